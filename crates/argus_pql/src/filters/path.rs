//! Path and mime-type filters, including full-text search over paths.

use crate::error::PqlError;
use crate::filters::{derive_rank_column, finish_sortable_cte};
use crate::fts::parse_and_escape_query;
use crate::state::{QueryState, SortableOptions};
use argus_db::DbValue;
use serde::{Deserialize, Serialize};

/// Restrict results to files under any of the given path prefixes.
pub fn build_path_in_cte(
    prefixes: &[String],
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    let mut params = Vec::new();
    let clauses: Vec<String> = prefixes
        .iter()
        .map(|prefix| {
            params.push(DbValue::Text(format!("{}%", escape_like(prefix))));
            "files.path LIKE ? ESCAPE '\\'".to_string()
        })
        .collect();

    let std = state.std_cols(ctx);
    let body = format!(
        "SELECT {std}\nFROM {ctx}\nJOIN files ON files.id = {ctx}.file_id\nWHERE {}",
        clauses.join(" OR ")
    );
    Ok(state.add_cte("path_in", body, params))
}

/// Restrict results to items with one of the given mime types.
pub fn build_type_in_cte(
    types: &[String],
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    let placeholders = vec!["?"; types.len()].join(", ");
    let params = types
        .iter()
        .map(|t| DbValue::Text(t.clone()))
        .collect::<Vec<_>>();

    let std = state.std_cols(ctx);
    let body = format!(
        "SELECT {std}\nFROM {ctx}\nJOIN items ON items.id = {ctx}.item_id\nWHERE items.type IN ({placeholders})"
    );
    Ok(state.add_cte("type_in", body, params))
}

/// Full-text match over file paths and names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPathArgs {
    pub r#match: String,
    /// When false, the query is escaped before being handed to FTS5.
    #[serde(default = "default_true")]
    pub raw_fts5_match: bool,
    /// Match only the filename column instead of the whole path.
    #[serde(default)]
    pub filename_only: bool,
}

fn default_true() -> bool {
    true
}

impl MatchPathArgs {
    pub fn validate(&mut self, _sortable: &mut SortableOptions) -> Result<bool, PqlError> {
        if self.r#match.trim().is_empty() {
            return Ok(false);
        }
        if !self.raw_fts5_match {
            self.r#match = parse_and_escape_query(&self.r#match);
        }
        Ok(true)
    }
}

pub fn build_match_path_cte(
    args: &MatchPathArgs,
    sortable: &SortableOptions,
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    let std = state.std_cols(ctx);
    // Column-restricted FTS5 queries go through the query syntax, not the
    // MATCH operand.
    let match_expr = if args.filename_only {
        format!("filename : ({})", args.r#match)
    } else {
        args.r#match.clone()
    };

    let rank = if state.is_count_query {
        String::new()
    } else {
        format!(", {}", derive_rank_column("files_path_fts.rank", sortable))
    };
    let body = format!(
        "SELECT {std}{rank}\nFROM {ctx}\nJOIN files_path_fts ON files_path_fts.rowid = {ctx}.file_id\nWHERE files_path_fts MATCH ?"
    );
    let params = vec![DbValue::Text(match_expr)];

    Ok(finish_sortable_cte(
        "match_path",
        body,
        params,
        sortable,
        !state.is_count_query,
        state,
    ))
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
