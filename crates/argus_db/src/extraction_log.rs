//! Extraction job anchors and the append-only progress log.
//!
//! Jobs are made atomic through foreign keys: `item_data.job_id` cascades on
//! delete, `data_log.job_id` is set NULL, so removing an incomplete
//! `data_jobs` row erases its partial outputs while keeping the log entry.

use crate::connection::IndexDb;
use crate::error::DbError;
use crate::value::DbRow;
use chrono::Utc;

/// Counters written into `data_log` while a job runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCounters {
    pub image_files: i64,
    pub video_files: i64,
    pub other_files: i64,
    pub total_segments: i64,
    pub errors: i64,
    pub total_remaining: i64,
    pub data_load_time: f64,
    pub inference_time: f64,
}

/// One row of `data_log` as reported by the job history endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub job_id: Option<i64>,
    pub start_time: String,
    pub end_time: String,
    pub data_type: String,
    pub setter: String,
    pub threshold: Option<f64>,
    pub batch_size: i64,
    pub image_files: i64,
    pub video_files: i64,
    pub other_files: i64,
    pub total_segments: i64,
    pub errors: i64,
    pub total_remaining: i64,
    pub data_load_time: f64,
    pub inference_time: f64,
    pub completed: bool,
    /// Distinct non-placeholder outputs still attached to the job.
    pub distinct_item_count: i64,
}

/// Remove every incomplete job anchor; partial outputs cascade away.
pub fn remove_incomplete_jobs(db: &IndexDb) -> Result<usize, DbError> {
    db.execute("DELETE FROM data_jobs WHERE completed = 0", &[])
}

/// Start a job: sweep stale incomplete anchors, insert a fresh anchor and
/// its log row. Returns the job id (not the log id).
pub fn add_data_log(
    db: &IndexDb,
    scan_time: &str,
    threshold: Option<f64>,
    data_type: &str,
    setter: &str,
    batch_size: u32,
) -> Result<i64, DbError> {
    remove_incomplete_jobs(db)?;
    db.execute("INSERT INTO data_jobs (completed) VALUES (0)", &[])?;
    let job_id = db.last_insert_rowid();

    db.execute(
        r#"
        INSERT INTO data_log (
            start_time,
            end_time,
            type,
            setter,
            threshold,
            batch_size,
            job_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        &[
            scan_time.into(),
            Utc::now().to_rfc3339().into(),
            data_type.into(),
            setter.into(),
            threshold.into(),
            batch_size.into(),
            job_id.into(),
        ],
    )?;
    Ok(job_id)
}

/// Write progress counters; `finished` also flips the job anchor.
pub fn update_log(
    db: &IndexDb,
    job_id: i64,
    counters: &LogCounters,
    finished: bool,
) -> Result<(), DbError> {
    db.execute(
        r#"
        UPDATE data_log
        SET end_time = ?,
            image_files = ?,
            video_files = ?,
            other_files = ?,
            total_segments = ?,
            errors = ?,
            total_remaining = ?,
            data_load_time = ?,
            inference_time = ?,
            completed = ?
        WHERE job_id = ?
        "#,
        &[
            Utc::now().to_rfc3339().into(),
            counters.image_files.into(),
            counters.video_files.into(),
            counters.other_files.into(),
            counters.total_segments.into(),
            counters.errors.into(),
            counters.total_remaining.into(),
            counters.data_load_time.into(),
            counters.inference_time.into(),
            finished.into(),
            job_id.into(),
        ],
    )?;
    if finished {
        db.execute(
            "UPDATE data_jobs SET completed = 1 WHERE id = ?",
            &[job_id.into()],
        )?;
    }
    Ok(())
}

/// All log rows, most recent first.
pub fn get_all_data_logs(
    db: &IndexDb,
    page: Option<i64>,
    page_size: Option<i64>,
) -> Result<Vec<LogRecord>, DbError> {
    let mut sql = String::from(
        r#"
        SELECT
            data_log.id,
            data_log.job_id,
            start_time,
            data_log.end_time,
            COALESCE(COUNT(DISTINCT item_data.id), 0) AS distinct_item_count,
            type,
            setter,
            threshold,
            batch_size,
            image_files,
            video_files,
            other_files,
            total_segments,
            data_log.errors,
            total_remaining,
            data_load_time,
            inference_time,
            data_log.completed
        FROM data_log
        LEFT JOIN item_data
            ON item_data.job_id = data_log.job_id
            AND item_data.job_id IS NOT NULL
            AND item_data.is_placeholder = 0
        GROUP BY data_log.id
        ORDER BY start_time DESC
        "#,
    );
    let mut params = Vec::new();
    if let Some(size) = page_size {
        let page = page.unwrap_or(1).max(1);
        sql.push_str("LIMIT ? OFFSET ?");
        params.push(size.into());
        params.push(((page - 1) * size).into());
    }
    let rows = db.query_all(&sql, &params)?;
    rows.iter().map(log_record_from_row).collect()
}

fn log_record_from_row(row: &DbRow) -> Result<LogRecord, DbError> {
    Ok(LogRecord {
        id: row.get_by_name("id")?,
        job_id: row.get_by_name("job_id")?,
        start_time: row.get_by_name("start_time")?,
        end_time: row.get_by_name("end_time")?,
        data_type: row.get_by_name("type")?,
        setter: row.get_by_name("setter")?,
        threshold: row.get_by_name("threshold")?,
        batch_size: row.get_by_name("batch_size")?,
        image_files: row.get_by_name("image_files")?,
        video_files: row.get_by_name("video_files")?,
        other_files: row.get_by_name("other_files")?,
        total_segments: row.get_by_name("total_segments")?,
        errors: row.get_by_name("errors")?,
        total_remaining: row.get_by_name("total_remaining")?,
        data_load_time: row.get_by_name("data_load_time")?,
        inference_time: row.get_by_name("inference_time")?,
        completed: row.get_by_name("completed")?,
        distinct_item_count: row.get_by_name("distinct_item_count")?,
    })
}

/// Delete the job anchor behind a log row; its outputs cascade away while
/// the log entry itself survives with a NULL job id.
pub fn delete_data_job_by_log_id(db: &IndexDb, data_log_id: i64) -> Result<(), DbError> {
    let job_id: Option<Option<i64>> = db
        .query_opt(
            "SELECT job_id FROM data_log WHERE id = ?",
            &[data_log_id.into()],
        )?
        .map(|row| row.get(0))
        .transpose()?;
    if let Some(Some(job_id)) = job_id {
        db.execute("DELETE FROM data_jobs WHERE id = ?", &[job_id.into()])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item_data::add_item_data;
    use crate::schema::init_schema;
    use crate::setters::upsert_setter;
    use argus_protocol::OutputDataType;

    fn seeded_db() -> IndexDb {
        let db = IndexDb::open_memory().unwrap();
        init_schema(&db).unwrap();
        db.execute(
            "INSERT INTO items (sha256, md5, type, time_added) VALUES ('s1', 'm', 'image/png', 't')",
            &[],
        )
        .unwrap();
        upsert_setter(&db, "ocr/doctr").unwrap();
        db
    }

    #[test]
    fn incomplete_job_is_swept_with_its_outputs() {
        let db = seeded_db();
        let job_id = add_data_log(&db, "t0", None, "text", "ocr/doctr", 8).unwrap();
        add_item_data(&db, "s1", "ocr/doctr", job_id, OutputDataType::Text, 0, None, false)
            .unwrap();

        // Job never finished: the next job start removes it and its outputs.
        let next_job = add_data_log(&db, "t1", None, "text", "ocr/doctr", 8).unwrap();
        assert_ne!(job_id, next_job);

        let orphaned: i64 = db
            .query_scalar(
                "SELECT COUNT(*) FROM item_data WHERE job_id = ?",
                &[job_id.into()],
            )
            .unwrap();
        assert_eq!(orphaned, 0);

        // The first log row survives with job_id nulled.
        let job_ref: Option<i64> = db
            .query_opt("SELECT job_id FROM data_log WHERE start_time = 't0'", &[])
            .unwrap()
            .unwrap()
            .get(0)
            .unwrap();
        assert!(job_ref.is_none());
    }

    #[test]
    fn finished_job_survives_the_next_sweep() {
        let db = seeded_db();
        let job_id = add_data_log(&db, "t0", None, "text", "ocr/doctr", 8).unwrap();
        update_log(&db, job_id, &LogCounters::default(), true).unwrap();

        add_data_log(&db, "t1", None, "text", "ocr/doctr", 8).unwrap();
        let completed: bool = db
            .query_scalar(
                "SELECT completed FROM data_jobs WHERE id = ?",
                &[job_id.into()],
            )
            .unwrap();
        assert!(completed);
    }

    #[test]
    fn delete_by_log_id_cascades_outputs() {
        let db = seeded_db();
        let job_id = add_data_log(&db, "t0", None, "text", "ocr/doctr", 8).unwrap();
        add_item_data(&db, "s1", "ocr/doctr", job_id, OutputDataType::Text, 0, None, false)
            .unwrap();
        update_log(&db, job_id, &LogCounters::default(), true).unwrap();

        let log_id: i64 = db
            .query_scalar("SELECT id FROM data_log WHERE job_id = ?", &[job_id.into()])
            .unwrap();
        delete_data_job_by_log_id(&db, log_id).unwrap();

        let count: i64 = db.query_scalar("SELECT COUNT(*) FROM item_data", &[]).unwrap();
        assert_eq!(count, 0);
        let logs = get_all_data_logs(&db, None, None).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].job_id.is_none());
    }
}
