//! Full-text search over extracted text, with best-snippet extraction.

use crate::error::PqlError;
use crate::filters::{derive_rank_column, finish_sortable_cte};
use crate::fts::parse_and_escape_query;
use crate::state::{ExtraColumn, QueryState, SortableOptions};
use argus_db::DbValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchTextArgs {
    pub r#match: String,
    /// Apply only the metadata criteria, skipping the text match itself
    /// (and any ordering/snippet output).
    #[serde(default)]
    pub filter_only: bool,
    #[serde(default)]
    pub setters: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub min_language_confidence: Option<f64>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default = "default_true")]
    pub raw_fts5_match: bool,
    #[serde(default)]
    pub min_length: Option<i64>,
    #[serde(default)]
    pub max_length: Option<i64>,
    /// Return the best matching snippet under this alias in `extra`.
    #[serde(default)]
    pub select_snippet_as: Option<String>,
    /// Maximum snippet length in tokens.
    #[serde(default = "default_snippet_len")]
    pub s_max_len: i64,
    #[serde(default = "default_ellipsis")]
    pub s_ellipsis: String,
    #[serde(default = "default_start_tag")]
    pub s_start_tag: String,
    #[serde(default = "default_end_tag")]
    pub s_end_tag: String,
}

fn default_true() -> bool {
    true
}

fn default_snippet_len() -> i64 {
    30
}

fn default_ellipsis() -> String {
    "...".to_string()
}

fn default_start_tag() -> String {
    "<b>".to_string()
}

fn default_end_tag() -> String {
    "</b>".to_string()
}

impl MatchTextArgs {
    pub fn validate(&mut self, sortable: &mut SortableOptions) -> Result<bool, PqlError> {
        if !self.filter_only && self.r#match.trim().is_empty() {
            return Ok(false);
        }
        if self.filter_only {
            // Pure filtering: no rank output, no snippet.
            self.select_snippet_as = None;
            self.r#match.clear();
            sortable.order_by = false;
            sortable.select_as = None;
            sortable.row_n = false;
        }
        if !self.raw_fts5_match {
            self.r#match = parse_and_escape_query(&self.r#match);
        }
        Ok(true)
    }

    /// WHERE criteria over text metadata, shared with embedding search.
    pub(crate) fn metadata_criteria(&self, params: &mut Vec<DbValue>) -> Vec<String> {
        text_metadata_criteria(
            &self.setters,
            &self.languages,
            self.min_language_confidence,
            self.min_confidence,
            self.min_length,
            self.max_length,
            params,
        )
    }
}

/// Shared text metadata criteria builder.
#[allow(clippy::too_many_arguments)]
pub(crate) fn text_metadata_criteria(
    setters: &[String],
    languages: &[String],
    min_language_confidence: Option<f64>,
    min_confidence: Option<f64>,
    min_length: Option<i64>,
    max_length: Option<i64>,
    params: &mut Vec<DbValue>,
) -> Vec<String> {
    let mut criteria = Vec::new();
    if let Some(min) = min_length {
        criteria.push("extracted_text.text_length >= ?".to_string());
        params.push(min.into());
    }
    if let Some(max) = max_length {
        criteria.push("extracted_text.text_length <= ?".to_string());
        params.push(max.into());
    }
    if !setters.is_empty() {
        let placeholders = vec!["?"; setters.len()].join(", ");
        criteria.push(format!("setters.name IN ({placeholders})"));
        params.extend(setters.iter().map(|s| DbValue::Text(s.clone())));
    }
    if !languages.is_empty() {
        let placeholders = vec!["?"; languages.len()].join(", ");
        criteria.push(format!("extracted_text.language IN ({placeholders})"));
        params.extend(languages.iter().map(|l| DbValue::Text(l.clone())));
    }
    if let Some(min) = min_language_confidence {
        criteria.push("extracted_text.language_confidence >= ?".to_string());
        params.push(min.into());
    }
    if let Some(min) = min_confidence {
        criteria.push("extracted_text.confidence >= ?".to_string());
        params.push(min.into());
    }
    criteria
}

pub fn build_match_text_cte(
    args: &MatchTextArgs,
    sortable: &SortableOptions,
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    let mut params: Vec<DbValue> = Vec::new();
    let mut criteria = Vec::new();
    if !args.filter_only {
        criteria.push("extracted_text_fts MATCH ?".to_string());
        params.push(DbValue::Text(args.r#match.clone()));
    }
    criteria.extend(args.metadata_criteria(&mut params));
    let where_clause = if criteria.is_empty() {
        String::new()
    } else {
        format!("\nWHERE {}", criteria.join(" AND "))
    };

    let std = state.std_cols(ctx);
    let snippet_requested = args.select_snippet_as.is_some() && !state.is_count_query;
    let snippet_col = "snippet(extracted_text_fts, -1, ?, ?, ?, ?) AS snip";
    let snippet_params = |params: &mut Vec<DbValue>| {
        params.push(args.s_start_tag.as_str().into());
        params.push(args.s_end_tag.as_str().into());
        params.push(args.s_ellipsis.as_str().into());
        params.push(args.s_max_len.into());
    };

    if state.is_text_query {
        // One row per text: join through the context's data_id directly.
        let joins = format!(
            "FROM {ctx}\nJOIN item_data ON item_data.id = {ctx}.data_id\nJOIN setters ON setters.id = item_data.setter_id\nJOIN extracted_text ON extracted_text.id = {ctx}.data_id\nJOIN extracted_text_fts ON extracted_text_fts.rowid = {ctx}.data_id"
        );
        let rank_expr = if args.filter_only { "1" } else { "extracted_text_fts.rank" };

        if snippet_requested {
            // The snippet function cannot share a SELECT with row_number();
            // compute it in a sub-CTE first.
            let mut match_params = vec![];
            let mut body = format!("SELECT {std}, ");
            snippet_params(&mut match_params);
            body.push_str(snippet_col);
            body.push_str(&format!(", {rank_expr} AS rank_val\n{joins}{where_clause}"));
            match_params.extend(params);
            let match_cte = state.add_cte("matchq", body, match_params);

            let inner_std = state.std_cols(&match_cte);
            let outer = format!(
                "SELECT {inner_std}, {match_cte}.snip, {}\nFROM {match_cte}",
                derive_rank_column(&format!("{match_cte}.rank_val"), sortable)
            );
            let cte = finish_sortable_cte("match_text", outer, vec![], sortable, true, state);
            state.extra_columns.push(ExtraColumn {
                cte_name: cte.clone(),
                column: "snip",
                alias: args.select_snippet_as.clone().expect("snippet requested"),
                need_join: false,
            });
            return Ok(cte);
        }

        let rank = if state.is_count_query {
            String::new()
        } else {
            format!(", {}", derive_rank_column(rank_expr, sortable))
        };
        let body = format!("SELECT {std}{rank}\n{joins}{where_clause}");
        return Ok(finish_sortable_cte(
            "match_text",
            body,
            params,
            sortable,
            !state.is_count_query,
            state,
        ));
    }

    // File/item query: one row per file, best rank across its texts.
    let joins = format!(
        "FROM {ctx}\nJOIN item_data ON item_data.item_id = {ctx}.item_id\nJOIN setters ON setters.id = item_data.setter_id\nJOIN extracted_text ON item_data.id = extracted_text.id\nJOIN extracted_text_fts ON extracted_text_fts.rowid = extracted_text.id"
    );

    if snippet_requested {
        let mut match_params = vec![];
        let mut body = format!("SELECT {std}, ");
        snippet_params(&mut match_params);
        body.push_str(snippet_col);
        body.push_str(&format!(", extracted_text_fts.rank AS rank_val\n{joins}{where_clause}"));
        match_params.extend(params);
        let match_cte = state.add_cte("matchq", body, match_params);

        // Partition per file to keep only the best matching text. The
        // row_number cannot live in the same SELECT as snippet(), hence the
        // extra hop.
        let rownum_body = format!(
            "SELECT {match_cte}.*, ROW_NUMBER() OVER (PARTITION BY {match_cte}.file_id ORDER BY {match_cte}.rank_val ASC) AS rn\nFROM {match_cte}"
        );
        let rownum_cte = state.add_cte("rownum", rownum_body, vec![]);

        let inner_std = state.std_cols(&rownum_cte);
        let outer = format!(
            "SELECT {inner_std}, {rownum_cte}.snip, {}\nFROM {rownum_cte}\nWHERE {rownum_cte}.rn = 1",
            derive_rank_column(&format!("{rownum_cte}.rank_val"), sortable)
        );
        let cte = finish_sortable_cte("match_text", outer, vec![], sortable, true, state);
        state.extra_columns.push(ExtraColumn {
            cte_name: cte.clone(),
            column: "snip",
            alias: args.select_snippet_as.clone().expect("snippet requested"),
            need_join: false,
        });
        return Ok(cte);
    }

    let rank_expr = if args.filter_only { "1" } else { "MIN(extracted_text_fts.rank)" };
    let rank = if state.is_count_query {
        String::new()
    } else {
        format!(", {}", derive_rank_column(rank_expr, sortable))
    };
    let body = format!(
        "SELECT {std}{rank}\n{joins}{where_clause}\nGROUP BY {ctx}.file_id"
    );
    Ok(finish_sortable_cte(
        "match_text",
        body,
        params,
        sortable,
        !state.is_count_query,
        state,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_only_clears_order_and_snippet() {
        let mut args = MatchTextArgs {
            r#match: "ignored".into(),
            filter_only: true,
            setters: vec!["ocr/doctr".into()],
            languages: vec![],
            min_language_confidence: None,
            min_confidence: None,
            raw_fts5_match: true,
            min_length: None,
            max_length: None,
            select_snippet_as: Some("snip".into()),
            s_max_len: 30,
            s_ellipsis: "...".into(),
            s_start_tag: "<b>".into(),
            s_end_tag: "</b>".into(),
        };
        let mut sortable = SortableOptions {
            order_by: true,
            ..Default::default()
        };
        assert!(args.validate(&mut sortable).unwrap());
        assert!(!sortable.order_by);
        assert!(args.select_snippet_as.is_none());
        assert!(args.r#match.is_empty());
    }

    #[test]
    fn grouped_query_takes_best_rank_per_file() {
        let mut state = QueryState::new(false, false);
        let args = MatchTextArgs {
            r#match: "sunset".into(),
            filter_only: false,
            setters: vec![],
            languages: vec![],
            min_language_confidence: None,
            min_confidence: None,
            raw_fts5_match: true,
            min_length: None,
            max_length: None,
            select_snippet_as: None,
            s_max_len: 30,
            s_ellipsis: "...".into(),
            s_start_tag: "<b>".into(),
            s_end_tag: "</b>".into(),
        };
        build_match_text_cte(&args, &SortableOptions::default(), "root", &mut state).unwrap();
        let body = &state.ctes.last().unwrap().body;
        assert!(body.contains("MIN(extracted_text_fts.rank) AS order_rank"));
        assert!(body.contains("GROUP BY root.file_id"));
    }

    #[test]
    fn snippet_path_adds_three_ctes() {
        let mut state = QueryState::new(false, false);
        let args = MatchTextArgs {
            r#match: "sunset".into(),
            filter_only: false,
            setters: vec![],
            languages: vec![],
            min_language_confidence: None,
            min_confidence: None,
            raw_fts5_match: true,
            min_length: None,
            max_length: None,
            select_snippet_as: Some("best".into()),
            s_max_len: 30,
            s_ellipsis: "...".into(),
            s_start_tag: "<b>".into(),
            s_end_tag: "</b>".into(),
        };
        build_match_text_cte(&args, &SortableOptions::default(), "root", &mut state).unwrap();
        assert_eq!(state.ctes.len(), 3);
        assert!(state.ctes[0].body.contains("snippet(extracted_text_fts"));
        assert!(state.ctes[1].body.contains("ROW_NUMBER() OVER (PARTITION BY"));
        assert!(state.ctes[2].body.contains("rn = 1"));
        assert_eq!(state.extra_columns.len(), 1);
        assert_eq!(state.extra_columns[0].alias, "best");
    }
}
