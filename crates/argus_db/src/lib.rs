//! Index database layer for Argus.
//!
//! One SQLite database per index. Writers open with WAL and are expected to
//! be funnelled through a single process (the job worker); readers open with
//! the `?mode=ro` URI modifier and can coexist freely.
//!
//! # Example
//!
//! ```rust,ignore
//! use argus_db::{IndexDb, AccessMode};
//!
//! let db = IndexDb::open(Path::new("./index.db"), AccessMode::ReadWrite)?;
//! db.execute("INSERT INTO setters (name) VALUES (?)", &["ocr/doctr".into()])?;
//! let rows = db.query_all("SELECT id, name FROM setters", &[])?;
//! ```

pub mod connection;
pub mod embeddings;
pub mod error;
pub mod extracted_text;
pub mod extraction_log;
pub mod files;
pub mod folders;
pub mod item_data;
pub mod paths;
pub mod schema;
pub mod setters;
pub mod system_config;
pub mod tags;
pub mod value;
pub mod vector;

pub use connection::{AccessMode, IndexDb};
pub use error::DbError;
pub use value::{DbRow, DbValue, FromDbValue};
pub use vector::{deserialize_f32, serialize_f32};

pub type Result<T> = std::result::Result<T, DbError>;
