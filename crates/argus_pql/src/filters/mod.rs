//! The filter set.
//!
//! Every filter consumes the current context CTE and emits a new one with
//! the standard id columns. Sortable filters additionally expose an
//! `order_rank` column and may register ordering and extra output columns on
//! the compilation state.

pub mod embeddings;
pub mod kv;
pub mod lineage;
pub mod path;
pub mod text;

use crate::error::PqlError;
use crate::state::{bound_param, QueryState, SortableOptions};
use argus_db::DbValue;
use serde::{Deserialize, Serialize};

pub use embeddings::{QueryEmbedder, SemanticImageArgs, SemanticTextArgs};
pub use kv::ArgValues;
pub use lineage::{DataSourceArgs, ProcessedByArgs};
pub use path::MatchPathArgs;
pub use text::MatchTextArgs;

/// Operator applied by the KV comparison family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    EndsWith,
    Contains,
}

/// A leaf of the query tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    Eq {
        eq: ArgValues,
    },
    Neq {
        neq: ArgValues,
    },
    In {
        #[serde(rename = "in_")]
        in_: ArgValues,
    },
    Nin {
        nin: ArgValues,
    },
    Gt {
        gt: ArgValues,
    },
    Gte {
        gte: ArgValues,
    },
    Lt {
        lt: ArgValues,
    },
    Lte {
        lte: ArgValues,
    },
    StartsWith {
        startswith: ArgValues,
    },
    EndsWith {
        endswith: ArgValues,
    },
    Contains {
        contains: ArgValues,
    },
    PathIn {
        path_in: Vec<String>,
    },
    TypeIn {
        type_in: Vec<String>,
    },
    MatchPath {
        match_path: MatchPathArgs,
        #[serde(flatten)]
        sortable: SortableOptions,
    },
    MatchText {
        match_text: MatchTextArgs,
        #[serde(flatten)]
        sortable: SortableOptions,
    },
    SemanticText {
        semantic_text: SemanticTextArgs,
        #[serde(flatten)]
        sortable: SortableOptions,
    },
    SemanticImage {
        semantic_image: SemanticImageArgs,
        #[serde(flatten)]
        sortable: SortableOptions,
    },
    ProcessedBy {
        processed_by: ProcessedByArgs,
    },
    DerivedBy {
        derived_by: ProcessedByArgs,
    },
    DataSource {
        data_source: DataSourceArgs,
    },
}

impl Filter {
    /// Normalise arguments and decide whether the filter is vacuous.
    ///
    /// Returns false when the filter should be dropped from the tree.
    pub fn validate(&mut self, embedder: &dyn QueryEmbedder) -> Result<bool, PqlError> {
        match self {
            Filter::Eq { eq: args }
            | Filter::Neq { neq: args }
            | Filter::In { in_: args }
            | Filter::Nin { nin: args }
            | Filter::Gt { gt: args }
            | Filter::Gte { gte: args }
            | Filter::Lt { lt: args }
            | Filter::Lte { lte: args }
            | Filter::StartsWith { startswith: args }
            | Filter::EndsWith { endswith: args }
            | Filter::Contains { contains: args } => args.validate(),
            Filter::PathIn { path_in } => Ok(!path_in.is_empty()),
            Filter::TypeIn { type_in } => Ok(!type_in.is_empty()),
            Filter::MatchPath {
                match_path,
                sortable,
            } => match_path.validate(sortable),
            Filter::MatchText {
                match_text,
                sortable,
            } => match_text.validate(sortable),
            Filter::SemanticText { semantic_text, .. } => semantic_text.validate(embedder),
            Filter::SemanticImage { semantic_image, .. } => semantic_image.validate(embedder),
            Filter::ProcessedBy { processed_by } => Ok(!processed_by.setter.is_empty()),
            Filter::DerivedBy { derived_by } => Ok(!derived_by.setter.is_empty()),
            Filter::DataSource { data_source } => data_source.validate(),
        }
    }

    /// Compile the filter against the context CTE, returning the new CTE
    /// name.
    pub fn build_cte(&self, ctx: &str, state: &mut QueryState) -> Result<String, PqlError> {
        match self {
            Filter::Eq { eq } => kv::build_kv_cte("eq", KvOp::Eq, eq, ctx, state),
            Filter::Neq { neq } => kv::build_kv_cte("neq", KvOp::Neq, neq, ctx, state),
            Filter::In { in_ } => kv::build_kv_cte("in", KvOp::Eq, in_, ctx, state),
            Filter::Nin { nin } => kv::build_kv_cte("nin", KvOp::Neq, nin, ctx, state),
            Filter::Gt { gt } => kv::build_kv_cte("gt", KvOp::Gt, gt, ctx, state),
            Filter::Gte { gte } => kv::build_kv_cte("gte", KvOp::Gte, gte, ctx, state),
            Filter::Lt { lt } => kv::build_kv_cte("lt", KvOp::Lt, lt, ctx, state),
            Filter::Lte { lte } => kv::build_kv_cte("lte", KvOp::Lte, lte, ctx, state),
            Filter::StartsWith { startswith } => {
                kv::build_kv_cte("startswith", KvOp::StartsWith, startswith, ctx, state)
            }
            Filter::EndsWith { endswith } => {
                kv::build_kv_cte("endswith", KvOp::EndsWith, endswith, ctx, state)
            }
            Filter::Contains { contains } => {
                kv::build_kv_cte("contains", KvOp::Contains, contains, ctx, state)
            }
            Filter::PathIn { path_in } => path::build_path_in_cte(path_in, ctx, state),
            Filter::TypeIn { type_in } => path::build_type_in_cte(type_in, ctx, state),
            Filter::MatchPath {
                match_path,
                sortable,
            } => path::build_match_path_cte(match_path, sortable, ctx, state),
            Filter::MatchText {
                match_text,
                sortable,
            } => text::build_match_text_cte(match_text, sortable, ctx, state),
            Filter::SemanticText {
                semantic_text,
                sortable,
            } => embeddings::build_semantic_text_cte(semantic_text, sortable, ctx, state),
            Filter::SemanticImage {
                semantic_image,
                sortable,
            } => embeddings::build_semantic_image_cte(semantic_image, sortable, ctx, state),
            Filter::ProcessedBy { processed_by } => {
                lineage::build_processed_by_cte(processed_by, ctx, state)
            }
            Filter::DerivedBy { derived_by } => {
                lineage::build_derived_by_cte(derived_by, ctx, state)
            }
            Filter::DataSource { data_source } => {
                lineage::build_data_source_cte(data_source, ctx, state)
            }
        }
    }
}

/// Wrap a sortable rank expression, applying `row_number()` when requested.
pub(crate) fn derive_rank_column(rank_expr: &str, sortable: &SortableOptions) -> String {
    if sortable.row_n && (sortable.order_by || sortable.select_as.is_some()) {
        format!(
            "ROW_NUMBER() OVER (ORDER BY {rank_expr} {}) AS order_rank",
            sortable.row_n_direction.as_sql()
        )
    } else {
        format!("{rank_expr} AS order_rank")
    }
}

/// Finish a sortable filter's CTE: apply cursor bounds and register order
/// and extra columns. `has_rank` is false in count mode, where the rank
/// column (and the bounds that depend on it) are dropped.
pub(crate) fn finish_sortable_cte(
    label: &str,
    body: String,
    mut params: Vec<DbValue>,
    sortable: &SortableOptions,
    has_rank: bool,
    state: &mut QueryState,
) -> String {
    let body = if has_rank && (sortable.gt.is_some() || sortable.lt.is_some()) {
        let mut clauses = Vec::new();
        if let Some(gt) = sortable.gt.as_ref().and_then(bound_param) {
            clauses.push("order_rank > ?".to_string());
            params.push(gt);
        }
        if let Some(lt) = sortable.lt.as_ref().and_then(bound_param) {
            clauses.push("order_rank < ?".to_string());
            params.push(lt);
        }
        if clauses.is_empty() {
            body
        } else {
            format!(
                "SELECT * FROM (\n{body}\n) AS bounded_{label}\nWHERE {}",
                clauses.join(" AND ")
            )
        }
    } else {
        body
    };

    let cte_name = state.add_cte(label, body, params);

    if has_rank {
        if sortable.order_by {
            state.order_list.push(crate::state::OrderByFilterRef {
                cte_name: cte_name.clone(),
                direction: sortable.direction,
                priority: sortable.priority,
            });
        }
        if let Some(alias) = &sortable.select_as {
            state.extra_columns.push(crate::state::ExtraColumn {
                cte_name: cte_name.clone(),
                column: "order_rank",
                alias: alias.clone(),
                need_join: !sortable.order_by,
            });
        }
    }

    cte_name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::embeddings::NoEmbedder;

    #[test]
    fn filters_deserialize_from_wire_keys() {
        let f: Filter = serde_json::from_value(serde_json::json!({
            "eq": { "type": "image/png" }
        }))
        .unwrap();
        assert!(matches!(f, Filter::Eq { .. }));

        let f: Filter = serde_json::from_value(serde_json::json!({
            "match_text": { "match": "sunset" },
            "order_by": true,
            "priority": 10
        }))
        .unwrap();
        match f {
            Filter::MatchText { sortable, .. } => {
                assert!(sortable.order_by);
                assert_eq!(sortable.priority, 10);
            }
            _ => panic!("expected match_text"),
        }
    }

    #[test]
    fn empty_kv_filter_is_vacuous() {
        let mut f: Filter = serde_json::from_value(serde_json::json!({ "eq": {} })).unwrap();
        assert!(!f.validate(&NoEmbedder).unwrap());
    }

    #[test]
    fn row_n_wraps_rank_in_window() {
        let sortable = SortableOptions {
            order_by: true,
            row_n: true,
            ..Default::default()
        };
        let col = derive_rank_column("rank", &sortable);
        assert!(col.starts_with("ROW_NUMBER() OVER (ORDER BY rank ASC)"));
    }
}
