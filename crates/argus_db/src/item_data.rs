//! Derived-data rows.

use crate::connection::IndexDb;
use crate::error::DbError;
use crate::files::get_item_id;
use crate::value::DbValue;
use argus_protocol::OutputDataType;

/// Insert one `item_data` row for an item addressed by content hash.
///
/// `source_id` chains derived data to the row it was produced from; origin
/// rows (derived straight from the item) leave it NULL and set `is_origin`.
/// Placeholder rows record that a model processed an item without output so
/// the item is not picked up again.
#[allow(clippy::too_many_arguments)]
pub fn add_item_data(
    db: &IndexDb,
    item_sha256: &str,
    setter_name: &str,
    job_id: i64,
    data_type: OutputDataType,
    index: i64,
    source_id: Option<i64>,
    is_placeholder: bool,
) -> Result<i64, DbError> {
    let item_id = get_item_id(db, item_sha256)?
        .ok_or_else(|| DbError::NotFound(format!("item {item_sha256}")))?;
    let is_origin: DbValue = if source_id.is_none() {
        DbValue::Integer(1)
    } else {
        DbValue::Null
    };

    let inserted = db.execute(
        r#"
        INSERT INTO item_data
        (job_id, item_id, setter_id, data_type, idx, is_origin, source_id, is_placeholder)
        SELECT ?, ?, setters.id, ?, ?, ?, ?, ?
        FROM setters
        WHERE setters.name = ?
        "#,
        &[
            job_id.into(),
            item_id.into(),
            data_type.as_str().into(),
            index.into(),
            is_origin,
            source_id.into(),
            is_placeholder.into(),
            setter_name.into(),
        ],
    )?;
    if inserted == 0 {
        return Err(DbError::NotFound(format!("setter {setter_name}")));
    }
    Ok(db.last_insert_rowid())
}

/// Count of non-placeholder rows written by a job.
pub fn count_job_outputs(db: &IndexDb, job_id: i64) -> Result<i64, DbError> {
    db.query_scalar(
        "SELECT COUNT(*) FROM item_data WHERE job_id = ? AND is_placeholder = 0",
        &[job_id.into()],
    )
}
