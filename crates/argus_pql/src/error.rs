//! Compile and execution errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PqlError {
    #[error("invalid filter arguments: {0}")]
    InvalidFilter(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("text columns are not allowed in a non-text query: {0}")]
    TextColumnOutsideTextQuery(String),

    #[error("filter was not validated before compilation")]
    NotValidated,

    #[error("unsupported partition column: {0}")]
    UnsupportedPartition(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("database error: {0}")]
    Db(#[from] argus_db::DbError),
}
