//! Filters over the derived-data lineage.

use crate::error::PqlError;
use crate::state::QueryState;
use argus_db::DbValue;
use serde::{Deserialize, Serialize};

/// Keep items that have already been processed by a setter.
///
/// Composed under `not_`, this is how a model's work discovery skips items
/// it has handled before (placeholders included).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedByArgs {
    pub setter: String,
}

pub fn build_processed_by_cte(
    args: &ProcessedByArgs,
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    let std = state.std_cols(ctx);
    let body = format!(
        "SELECT {std}\nFROM {ctx}\nJOIN item_data ON item_data.item_id = {ctx}.item_id\nJOIN setters ON setters.id = item_data.setter_id\nWHERE setters.name = ?\nGROUP BY {std}"
    );
    Ok(state.add_cte("processed_by", body, vec![DbValue::Text(args.setter.clone())]))
}

/// Keep text rows that already have derived data by a setter.
///
/// The text-target counterpart of [`ProcessedByArgs`]: a text embedder has
/// processed a text row iff some `item_data` row (placeholders included)
/// points back at it through `source_id`.
pub fn build_derived_by_cte(
    args: &ProcessedByArgs,
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    if !state.is_text_query {
        return Err(PqlError::TextColumnOutsideTextQuery("derived_by".into()));
    }
    let std = state.std_cols(ctx);
    let body = format!(
        "SELECT {std}\nFROM {ctx}\nJOIN item_data derived ON derived.source_id = {ctx}.data_id\nJOIN setters ON setters.id = derived.setter_id\nWHERE setters.name = ?\nGROUP BY {std}"
    );
    Ok(state.add_cte("derived_by", body, vec![DbValue::Text(args.setter.clone())]))
}

/// Restrict text rows by the setter and/or data type that produced them.
///
/// Only meaningful in text-entity queries, where the context carries a
/// `data_id`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataSourceArgs {
    #[serde(default)]
    pub setter_names: Vec<String>,
    #[serde(default)]
    pub data_types: Vec<String>,
    /// Keep only rows derived from other data (or only origin rows).
    #[serde(default)]
    pub is_origin: Option<bool>,
}

impl DataSourceArgs {
    pub fn validate(&self) -> Result<bool, PqlError> {
        Ok(!self.setter_names.is_empty() || !self.data_types.is_empty() || self.is_origin.is_some())
    }
}

pub fn build_data_source_cte(
    args: &DataSourceArgs,
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    if !state.is_text_query {
        return Err(PqlError::TextColumnOutsideTextQuery("data_source".into()));
    }
    let mut criteria = Vec::new();
    let mut params = Vec::new();
    if !args.setter_names.is_empty() {
        let placeholders = vec!["?"; args.setter_names.len()].join(", ");
        criteria.push(format!("setters.name IN ({placeholders})"));
        params.extend(args.setter_names.iter().map(|s| DbValue::Text(s.clone())));
    }
    if !args.data_types.is_empty() {
        let placeholders = vec!["?"; args.data_types.len()].join(", ");
        criteria.push(format!("item_data.data_type IN ({placeholders})"));
        params.extend(args.data_types.iter().map(|t| DbValue::Text(t.clone())));
    }
    if let Some(is_origin) = args.is_origin {
        if is_origin {
            criteria.push("item_data.is_origin = 1".to_string());
        } else {
            criteria.push("item_data.source_id IS NOT NULL".to_string());
        }
    }

    let std = state.std_cols(ctx);
    let body = format!(
        "SELECT {std}\nFROM {ctx}\nJOIN item_data ON item_data.id = {ctx}.data_id\nJOIN setters ON setters.id = item_data.setter_id\nWHERE {}",
        criteria.join(" AND ")
    );
    Ok(state.add_cte("data_source", body, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_source_requires_text_query() {
        let mut state = QueryState::new(false, false);
        let args = DataSourceArgs {
            setter_names: vec!["ocr/doctr".into()],
            ..Default::default()
        };
        assert!(build_data_source_cte(&args, "root", &mut state).is_err());
    }

    #[test]
    fn processed_by_groups_to_one_row_per_context_row() {
        let mut state = QueryState::new(false, false);
        let args = ProcessedByArgs {
            setter: "ocr/doctr".into(),
        };
        build_processed_by_cte(&args, "root", &mut state).unwrap();
        let body = &state.ctes.last().unwrap().body;
        assert!(body.contains("GROUP BY root.file_id, root.item_id"));
    }
}
