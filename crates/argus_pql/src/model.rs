//! Query tree model.

use crate::filters::Filter;
use serde::{Deserialize, Serialize};

/// Level at which a query addresses results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Entity {
    /// One row per file path.
    #[default]
    #[serde(rename = "file")]
    File,
    /// One row per item; the file is picked deterministically (MAX id).
    #[serde(rename = "item")]
    Item,
    /// One row per (extracted text, file) pair.
    #[serde(rename = "text-file")]
    TextFile,
    /// One row per extracted text.
    #[serde(rename = "text-item")]
    TextItem,
}

impl Entity {
    pub fn is_text(&self) -> bool {
        matches!(self, Entity::TextFile | Entity::TextItem)
    }
}

/// A node of the query tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryElement {
    And {
        #[serde(rename = "and_")]
        and: Vec<QueryElement>,
    },
    Or {
        #[serde(rename = "or_")]
        or: Vec<QueryElement>,
    },
    Not {
        #[serde(rename = "not_")]
        not: Box<QueryElement>,
    },
    Filter(Box<Filter>),
}

impl QueryElement {
    pub fn and(children: Vec<QueryElement>) -> Self {
        QueryElement::And { and: children }
    }

    pub fn or(children: Vec<QueryElement>) -> Self {
        QueryElement::Or { or: children }
    }

    pub fn not(child: QueryElement) -> Self {
        QueryElement::Not {
            not: Box::new(child),
        }
    }

    pub fn filter(filter: Filter) -> Self {
        QueryElement::Filter(Box::new(filter))
    }
}

/// Explicit ordering over a selectable column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderArgs {
    pub order_by: String,
    /// "asc" or "desc"; default depends on the column.
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

impl Default for OrderArgs {
    fn default() -> Self {
        Self {
            order_by: "last_modified".to_string(),
            order: None,
            priority: 0,
        }
    }
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

fn default_count() -> bool {
    true
}

fn default_results() -> bool {
    true
}

fn default_order_args() -> Vec<OrderArgs> {
    vec![OrderArgs {
        order_by: "last_modified".to_string(),
        order: Some("desc".to_string()),
        priority: 0,
    }]
}

/// A complete search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqlQuery {
    #[serde(default)]
    pub query: Option<QueryElement>,
    #[serde(default = "default_order_args")]
    pub order_args: Vec<OrderArgs>,
    #[serde(default)]
    pub entity: Entity,
    /// Collapse the result to one row per value of this column
    /// (`item_id` or `data_id`).
    #[serde(default)]
    pub partition_by: Option<String>,
    /// Additional columns to select; std columns are always included.
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    /// 0 means no limit.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_count")]
    pub count: bool,
    #[serde(default = "default_results")]
    pub results: bool,
    #[serde(default)]
    pub check_path: bool,
}

impl Default for PqlQuery {
    fn default() -> Self {
        Self {
            query: None,
            order_args: default_order_args(),
            entity: Entity::File,
            partition_by: None,
            select: Vec::new(),
            page: 1,
            page_size: 10,
            count: true,
            results: true,
            check_path: false,
        }
    }
}
