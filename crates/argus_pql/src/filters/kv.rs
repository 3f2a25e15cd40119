//! Key/value comparison filters over file, item and text columns.

use crate::columns::{is_text_column, qualified};
use crate::error::PqlError;
use crate::filters::KvOp;
use crate::state::QueryState;
use argus_db::DbValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column → value(s) arguments of one KV filter.
///
/// Values may be scalars or lists; list values are only meaningful for
/// equality and the string-match operators.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ArgValues(pub BTreeMap<String, serde_json::Value>);

impl ArgValues {
    pub fn validate(&self) -> Result<bool, PqlError> {
        for key in self.0.keys() {
            qualified(key)?;
        }
        Ok(!self.0.is_empty())
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn scalar_param(value: &serde_json::Value) -> Result<DbValue, PqlError> {
    match value {
        serde_json::Value::String(s) => Ok(DbValue::Text(s.clone())),
        serde_json::Value::Bool(b) => Ok(DbValue::Integer(*b as i64)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(DbValue::Integer(i))
            } else {
                Ok(DbValue::Real(n.as_f64().unwrap_or(0.0)))
            }
        }
        other => Err(PqlError::InvalidFilter(format!(
            "unsupported filter value: {other}"
        ))),
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn like_clause(col: &str, op: KvOp, value: &str, params: &mut Vec<DbValue>) -> String {
    let pattern = match op {
        KvOp::StartsWith => format!("{}%", escape_like(value)),
        KvOp::EndsWith => format!("%{}", escape_like(value)),
        KvOp::Contains => format!("%{}%", escape_like(value)),
        _ => unreachable!("like_clause only handles string-match operators"),
    };
    params.push(DbValue::Text(pattern));
    format!("{col} LIKE ? ESCAPE '\\'")
}

fn scalar_clause(
    col: &str,
    op: KvOp,
    value: &serde_json::Value,
    params: &mut Vec<DbValue>,
) -> Result<String, PqlError> {
    match op {
        KvOp::Eq | KvOp::Neq | KvOp::Gt | KvOp::Gte | KvOp::Lt | KvOp::Lte => {
            let sql_op = match op {
                KvOp::Eq => "=",
                KvOp::Neq => "!=",
                KvOp::Gt => ">",
                KvOp::Gte => ">=",
                KvOp::Lt => "<",
                KvOp::Lte => "<=",
                _ => unreachable!(),
            };
            params.push(scalar_param(value)?);
            Ok(format!("{col} {sql_op} ?"))
        }
        KvOp::StartsWith | KvOp::EndsWith | KvOp::Contains => {
            let s = value.as_str().ok_or_else(|| {
                PqlError::InvalidFilter(format!("{col}: string operator needs a string value"))
            })?;
            Ok(like_clause(col, op, s, params))
        }
    }
}

fn list_clause(
    col: &str,
    op: KvOp,
    values: &[serde_json::Value],
    params: &mut Vec<DbValue>,
) -> Result<String, PqlError> {
    if values.is_empty() {
        return Err(PqlError::InvalidFilter(format!("{col}: empty value list")));
    }
    match op {
        KvOp::Eq | KvOp::Neq => {
            let placeholders = vec!["?"; values.len()].join(", ");
            for v in values {
                params.push(scalar_param(v)?);
            }
            let keyword = if op == KvOp::Eq { "IN" } else { "NOT IN" };
            Ok(format!("{col} {keyword} ({placeholders})"))
        }
        KvOp::StartsWith | KvOp::EndsWith | KvOp::Contains => {
            let clauses: Result<Vec<_>, PqlError> = values
                .iter()
                .map(|v| {
                    let s = v.as_str().ok_or_else(|| {
                        PqlError::InvalidFilter(format!(
                            "{col}: string operator needs string values"
                        ))
                    })?;
                    Ok(like_clause(col, op, s, params))
                })
                .collect();
            Ok(format!("({})", clauses?.join(" OR ")))
        }
        _ => Err(PqlError::InvalidFilter(format!(
            "{col}: comparison operators do not accept value lists"
        ))),
    }
}

/// Compile one KV filter into a CTE.
pub fn build_kv_cte(
    label: &str,
    op: KvOp,
    args: &ArgValues,
    ctx: &str,
    state: &mut QueryState,
) -> Result<String, PqlError> {
    let mut criteria = Vec::new();
    let mut params = Vec::new();
    let mut uses_text_cols = false;

    for (key, value) in args.entries() {
        if is_text_column(key) {
            if !state.is_text_query {
                return Err(PqlError::TextColumnOutsideTextQuery(key.to_string()));
            }
            uses_text_cols = true;
        }
        let (col, _) = qualified(key)?;
        let clause = match value {
            serde_json::Value::Array(values) => list_clause(col, op, values, &mut params)?,
            scalar => scalar_clause(col, op, scalar, &mut params)?,
        };
        criteria.push(clause);
    }

    let std = state.std_cols(ctx);
    let mut body = format!(
        "SELECT {std}\nFROM {ctx}\nJOIN items ON items.id = {ctx}.item_id\nJOIN files ON files.id = {ctx}.file_id"
    );
    if state.is_text_query && uses_text_cols {
        body.push_str(&format!(
            "\nJOIN extracted_text ON extracted_text.id = {ctx}.data_id\nJOIN item_data ON item_data.id = {ctx}.data_id\nJOIN setters ON setters.id = item_data.setter_id"
        ));
    }
    body.push_str(&format!("\nWHERE {}", criteria.join(" AND ")));

    Ok(state.add_cte(label, body, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_eq_emits_placeholder() {
        let mut state = QueryState::new(false, false);
        let args = ArgValues(
            [("type".to_string(), serde_json::json!("image/png"))]
                .into_iter()
                .collect(),
        );
        let cte = build_kv_cte("eq", KvOp::Eq, &args, "root", &mut state).unwrap();
        let body = &state.ctes.last().unwrap().body;
        assert!(body.contains("items.type = ?"));
        assert_eq!(state.ctes.last().unwrap().params.len(), 1);
        assert_eq!(cte, "n_0_eq");
    }

    #[test]
    fn list_values_expand_to_in() {
        let mut state = QueryState::new(false, false);
        let args = ArgValues(
            [("size".to_string(), serde_json::json!([1, 2, 3]))]
                .into_iter()
                .collect(),
        );
        build_kv_cte("in", KvOp::Eq, &args, "root", &mut state).unwrap();
        let body = &state.ctes.last().unwrap().body;
        assert!(body.contains("items.size IN (?, ?, ?)"));
    }

    #[test]
    fn text_column_outside_text_query_is_rejected() {
        let mut state = QueryState::new(false, false);
        let args = ArgValues(
            [("language".to_string(), serde_json::json!("en"))]
                .into_iter()
                .collect(),
        );
        let err = build_kv_cte("eq", KvOp::Eq, &args, "root", &mut state).unwrap_err();
        assert!(matches!(err, PqlError::TextColumnOutsideTextQuery(_)));
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        let mut params = Vec::new();
        like_clause("files.path", KvOp::Contains, "50%_off", &mut params);
        match &params[0] {
            DbValue::Text(p) => assert_eq!(p, "%50\\%\\_off%"),
            _ => panic!("expected text param"),
        }
    }
}
