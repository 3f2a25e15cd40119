//! Tag vocabulary and tag-to-item links.

use crate::connection::IndexDb;
use crate::error::DbError;

/// Insert the tag if missing; returns its id either way.
pub fn upsert_tag(db: &IndexDb, namespace: &str, name: &str) -> Result<i64, DbError> {
    db.execute(
        "INSERT INTO tags (namespace, name) VALUES (?, ?) ON CONFLICT(namespace, name) DO NOTHING",
        &[namespace.into(), name.into()],
    )?;
    db.query_scalar(
        "SELECT id FROM tags WHERE namespace = ? AND name = ?",
        &[namespace.into(), name.into()],
    )
}

/// Link a tag to a derived-data row with a confidence score.
pub fn add_tag_to_data(
    db: &IndexDb,
    item_data_id: i64,
    tag_id: i64,
    confidence: f64,
) -> Result<(), DbError> {
    db.execute(
        r#"
        INSERT INTO tags_items (item_data_id, tag_id, confidence)
        VALUES (?, ?, ?)
        ON CONFLICT(item_data_id, tag_id) DO UPDATE SET confidence = excluded.confidence
        "#,
        &[item_data_id.into(), tag_id.into(), confidence.into()],
    )?;
    Ok(())
}

/// Delete tags no longer referenced by any item. Returns the number removed.
pub fn delete_orphan_tags(db: &IndexDb) -> Result<usize, DbError> {
    db.execute(
        r#"
        DELETE FROM tags
        WHERE NOT EXISTS (
            SELECT 1 FROM tags_items WHERE tags_items.tag_id = tags.id
        )
        "#,
        &[],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::init_schema;

    #[test]
    fn orphan_tags_are_removed() {
        let db = IndexDb::open_memory().unwrap();
        init_schema(&db).unwrap();
        upsert_tag(&db, "general", "landscape").unwrap();
        upsert_tag(&db, "general", "portrait").unwrap();
        let removed = delete_orphan_tags(&db).unwrap();
        assert_eq!(removed, 2);
    }
}
