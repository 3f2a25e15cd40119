//! Setter rows (one per model that has written data).

use crate::connection::IndexDb;
use crate::error::DbError;

/// Insert the setter if missing; returns its id either way.
pub fn upsert_setter(db: &IndexDb, name: &str) -> Result<i64, DbError> {
    db.execute(
        "INSERT INTO setters (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
        &[name.into()],
    )?;
    db.query_scalar("SELECT id FROM setters WHERE name = ?", &[name.into()])
}

pub fn get_setter_id(db: &IndexDb, name: &str) -> Result<Option<i64>, DbError> {
    match db.query_opt("SELECT id FROM setters WHERE name = ?", &[name.into()])? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Data types a setter has written so far.
pub fn get_setter_data_types(db: &IndexDb, name: &str) -> Result<Vec<String>, DbError> {
    let rows = db.query_all(
        r#"
        SELECT DISTINCT item_data.data_type
        FROM item_data
        JOIN setters ON setters.id = item_data.setter_id
        WHERE setters.name = ?
        "#,
        &[name.into()],
    )?;
    rows.iter().map(|r| r.get(0)).collect()
}

/// Delete a setter row; `item_data` rows cascade with it.
pub fn delete_setter_by_name(db: &IndexDb, name: &str) -> Result<usize, DbError> {
    db.execute("DELETE FROM setters WHERE name = ?", &[name.into()])
}

/// `(setter, non-placeholder row count)` pairs.
pub fn get_setters_total_data(db: &IndexDb) -> Result<Vec<(String, i64)>, DbError> {
    let rows = db.query_all(
        r#"
        SELECT s.name, COUNT(ie.id)
        FROM item_data ie
        JOIN setters s ON ie.setter_id = s.id
        WHERE ie.is_placeholder = 0
        GROUP BY s.id, s.name
        "#,
        &[],
    )?;
    rows.iter()
        .map(|r| Ok((r.get(0)?, r.get(1)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::init_schema;

    #[test]
    fn upsert_is_idempotent() {
        let db = IndexDb::open_memory().unwrap();
        init_schema(&db).unwrap();
        let a = upsert_setter(&db, "ocr/doctr").unwrap();
        let b = upsert_setter(&db, "ocr/doctr").unwrap();
        assert_eq!(a, b);
        let count: i64 = db.query_scalar("SELECT COUNT(*) FROM setters", &[]).unwrap();
        assert_eq!(count, 1);
    }
}
