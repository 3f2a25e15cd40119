//! Compilation state: the CTE chain and everything filters register on it.

use argus_db::DbValue;
use serde::{Deserialize, Serialize};

/// Sentinels used when coalescing rank columns across filters.
pub const VERY_LARGE_NUMBER: &str = "999999999999999";
pub const VERY_SMALL_NUMBER: &str = "-999999999999999";

/// One CTE in the chain, in definition order.
#[derive(Debug, Clone)]
pub struct Cte {
    pub name: String,
    pub body: String,
    pub params: Vec<DbValue>,
}

/// An ORDER BY contribution registered by a sortable filter.
#[derive(Debug, Clone)]
pub struct OrderByFilterRef {
    pub cte_name: String,
    pub direction: OrderDirection,
    pub priority: i32,
}

/// An extra output column registered by a filter (`select_as` / snippets).
#[derive(Debug, Clone)]
pub struct ExtraColumn {
    pub cte_name: String,
    /// Column name inside the CTE (`order_rank` or `snip`).
    pub column: &'static str,
    pub alias: String,
    /// The CTE must be LEFT JOINed in even when no ORDER BY references it.
    pub need_join: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Sorting/pagination options shared by every sortable filter.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SortableOptions {
    /// Contribute this filter's rank to the final ORDER BY.
    #[serde(default)]
    pub order_by: bool,
    #[serde(default)]
    pub direction: OrderDirection,
    /// Rank of this clause among all ORDER BY contributions. Equal
    /// priorities among filters coalesce into a single clause.
    #[serde(default)]
    pub priority: i32,
    /// Replace the rank with `row_number()` over it, making unrelated rank
    /// scales co-orderable.
    #[serde(default)]
    pub row_n: bool,
    #[serde(default)]
    pub row_n_direction: OrderDirection,
    /// Cursor bound: only rows with `order_rank > gt`. Ignored in count mode.
    #[serde(default)]
    pub gt: Option<serde_json::Value>,
    /// Cursor bound: only rows with `order_rank < lt`. Ignored in count mode.
    #[serde(default)]
    pub lt: Option<serde_json::Value>,
    /// Return the rank column under this alias in the result's extras.
    #[serde(default)]
    pub select_as: Option<String>,
}

/// Mutable state threaded through compilation.
#[derive(Debug, Default)]
pub struct QueryState {
    pub ctes: Vec<Cte>,
    pub order_list: Vec<OrderByFilterRef>,
    pub extra_columns: Vec<ExtraColumn>,
    pub cte_counter: usize,
    pub is_count_query: bool,
    pub is_text_query: bool,
}

impl QueryState {
    pub fn new(is_count_query: bool, is_text_query: bool) -> Self {
        Self {
            is_count_query,
            is_text_query,
            ..Default::default()
        }
    }

    /// Std columns of a context CTE: ids only, qualified.
    pub fn std_cols(&self, ctx: &str) -> String {
        if self.is_text_query {
            format!("{ctx}.file_id, {ctx}.item_id, {ctx}.data_id")
        } else {
            format!("{ctx}.file_id, {ctx}.item_id")
        }
    }

    /// Std column names without qualification (for UNION/EXCEPT shells).
    pub fn std_col_names(&self) -> &'static str {
        if self.is_text_query {
            "file_id, item_id, data_id"
        } else {
            "file_id, item_id"
        }
    }

    /// Register a CTE and return its name.
    pub fn add_cte(&mut self, label: &str, body: String, params: Vec<DbValue>) -> String {
        let name = format!("n_{}_{}", self.cte_counter, label);
        self.cte_counter += 1;
        self.ctes.push(Cte {
            name: name.clone(),
            body,
            params,
        });
        name
    }

    /// Register a CTE under an exact name (entity wrappers).
    pub fn add_named_cte(&mut self, name: &str, body: String, params: Vec<DbValue>) {
        self.ctes.push(Cte {
            name: name.to_string(),
            body,
            params,
        });
    }
}

/// Convert a JSON cursor bound into a bind value.
pub fn bound_param(value: &serde_json::Value) -> Option<DbValue> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(DbValue::Integer(i))
            } else {
                n.as_f64().map(DbValue::Real)
            }
        }
        serde_json::Value::String(s) => Some(DbValue::Text(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cte_names_are_unique_and_labelled() {
        let mut state = QueryState::new(false, false);
        let a = state.add_cte("eq", "SELECT 1".into(), vec![]);
        let b = state.add_cte("eq", "SELECT 2".into(), vec![]);
        assert_eq!(a, "n_0_eq");
        assert_eq!(b, "n_1_eq");
    }

    #[test]
    fn text_queries_carry_data_id() {
        let state = QueryState::new(false, true);
        assert_eq!(state.std_cols("c"), "c.file_id, c.item_id, c.data_id");
    }
}
