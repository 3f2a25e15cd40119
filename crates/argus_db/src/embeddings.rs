//! Embedding rows.

use crate::connection::IndexDb;
use crate::error::DbError;
use crate::vector::serialize_f32;

/// Store an embedding behind an existing `item_data` row.
pub fn add_embedding(db: &IndexDb, data_id: i64, embedding: &[f32]) -> Result<(), DbError> {
    db.execute(
        "INSERT INTO embeddings (id, embedding) VALUES (?, ?)",
        &[data_id.into(), serialize_f32(embedding).into()],
    )?;
    Ok(())
}
