//! Unified synchronous connection over the index database.

use crate::error::DbError;
use crate::value::{DbRow, DbValue, FromDbValue};
use crate::vector::register_vector_functions;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-write access. Opens with WAL; the caller is responsible for
    /// funnelling writes through a single process.
    ReadWrite,
    /// Read-only access via the `?mode=ro` URI modifier.
    ReadOnly,
}

/// A connection to one index database.
pub struct IndexDb {
    conn: Connection,
    access_mode: AccessMode,
}

impl std::fmt::Debug for IndexDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDb")
            .field("access_mode", &self.access_mode)
            .finish()
    }
}

impl IndexDb {
    /// Open an index database at `path`.
    ///
    /// Writers get WAL and foreign keys; readers open through a read-only
    /// URI so they cannot take the write lock. Vector distance functions are
    /// registered on every connection.
    pub fn open(path: &Path, access_mode: AccessMode) -> Result<Self, DbError> {
        let conn = match access_mode {
            AccessMode::ReadWrite => {
                let conn = Connection::open(path)?;
                // journal_mode returns a result row; go through a batch so
                // it is discarded.
                conn.execute_batch("PRAGMA journal_mode=WAL")?;
                info!("Opened index database (read-write): {}", path.display());
                conn
            }
            AccessMode::ReadOnly => {
                let uri = format!("file:{}?mode=ro", path.display());
                let conn = Connection::open_with_flags(
                    &uri,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
                )?;
                debug!("Opened index database (read-only): {}", path.display());
                conn
            }
        };
        conn.pragma_update(None, "foreign_keys", "ON")?;
        register_vector_functions(&conn)?;
        Ok(Self { conn, access_mode })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        register_vector_functions(&conn)?;
        Ok(Self {
            conn,
            access_mode: AccessMode::ReadWrite,
        })
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn is_writable(&self) -> bool {
        self.access_mode == AccessMode::ReadWrite
    }

    /// Execute a SQL statement, returning the number of affected rows.
    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<usize, DbError> {
        if !self.is_writable() {
            return Err(DbError::ReadOnly);
        }
        Ok(self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter()))?)
    }

    /// Execute a batch of SQL statements (DDL, migrations).
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        if !self.is_writable() {
            return Err(DbError::ReadOnly);
        }
        Ok(self.conn.execute_batch(sql)?)
    }

    /// Rowid of the most recent successful INSERT on this connection.
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Run a query and collect all rows.
    pub fn query_all(&self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Arc<Vec<String>> = Arc::new(
            stmt.column_names()
                .into_iter()
                .map(|c| c.to_string())
                .collect(),
        );
        let count = columns.len();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                values.push(DbValue::from_sql_ref(row.get_ref(i)?));
            }
            out.push(DbRow::new(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    /// Run a query expected to return at most one row.
    pub fn query_opt(&self, sql: &str, params: &[DbValue]) -> Result<Option<DbRow>, DbError> {
        Ok(self.query_all(sql, params)?.into_iter().next())
    }

    /// Run a query returning a single scalar value.
    pub fn query_scalar<T: FromDbValue>(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, DbError> {
        let row = self
            .query_opt(sql, params)?
            .ok_or_else(|| DbError::NotFound(sql.to_string()))?;
        row.get(0)
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on Ok and rolling
    /// back on Err.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Self) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        if !self.is_writable() {
            return Err(DbError::ReadOnly);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Raw access for call sites that need rusqlite directly.
    pub fn raw(&self) -> &Connection {
        &self.conn
    }
}
