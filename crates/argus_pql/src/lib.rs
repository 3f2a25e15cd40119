//! PQL: the typed query language over the Argus index.
//!
//! A query is a tree of filters combined with `and_`/`or_`/`not_` operators.
//! Compilation walks the tree and emits a chain of common table expressions:
//! each filter consumes the previous CTE's `(file_id, item_id[, data_id])`
//! rows and narrows or ranks them. The chain is then wrapped with entity
//! grouping, ordering, selection, and pagination.

pub mod builder;
pub mod columns;
pub mod error;
pub mod filters;
pub mod fts;
pub mod model;
pub mod order;
pub mod search;
pub mod state;

pub use builder::{build_query, prepare_query, CompiledQuery};
pub use error::PqlError;
pub use filters::embeddings::{EmbedArgs, NoEmbedder, QueryEmbedder};
pub use filters::Filter;
pub use model::{Entity, OrderArgs, PqlQuery, QueryElement};
pub use search::{search, search_stream, SearchMetrics, SearchOutcome, SearchResult};

pub type Result<T> = std::result::Result<T, PqlError>;
