//! Embedding serialization and vector distance SQL functions.
//!
//! Embeddings are stored as little-endian f32 blobs. Distance functions are
//! registered as deterministic scalar functions so the query compiler can use
//! them directly inside CTEs.

use crate::error::DbError;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

/// Serialize a float vector to the blob layout the index stores.
pub fn serialize_f32(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Deserialize a blob back into a float vector.
pub fn deserialize_f32(blob: &[u8]) -> Result<Vec<f32>, DbError> {
    if blob.len() % 4 != 0 {
        return Err(DbError::InvalidInput(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Register `vec_distance_l2` and `vec_distance_cosine` on a connection.
pub fn register_vector_functions(conn: &Connection) -> Result<(), DbError> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("vec_distance_l2", 2, flags, |ctx| {
        let a = ctx.get_raw(0).as_blob().map_err(map_fn_err)?;
        let b = ctx.get_raw(1).as_blob().map_err(map_fn_err)?;
        distance(a, b, l2).map_err(fn_err)
    })?;

    conn.create_scalar_function("vec_distance_cosine", 2, flags, |ctx| {
        let a = ctx.get_raw(0).as_blob().map_err(map_fn_err)?;
        let b = ctx.get_raw(1).as_blob().map_err(map_fn_err)?;
        distance(a, b, cosine).map_err(fn_err)
    })?;

    Ok(())
}

fn distance(a: &[u8], b: &[u8], f: fn(&[f32], &[f32]) -> f64) -> Result<f64, String> {
    let a = deserialize_f32(a).map_err(|e| e.to_string())?;
    let b = deserialize_f32(b).map_err(|e| e.to_string())?;
    if a.len() != b.len() {
        return Err(format!(
            "embedding dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        ));
    }
    Ok(f(&a, &b))
}

fn l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        na += (*x as f64) * (*x as f64);
        nb += (*y as f64) * (*y as f64);
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na.sqrt() * nb.sqrt())
}

fn fn_err(msg: String) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(msg.into())
}

fn map_fn_err(e: rusqlite::types::FromSqlError) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(Box::new(e))
}
