//! File and item rows.

use crate::connection::IndexDb;
use crate::error::DbError;
use crate::value::DbRow;
use chrono::Utc;

/// One row of the `files` table.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub sha256: String,
    pub item_id: i64,
    pub path: String,
    pub filename: String,
    pub last_modified: String,
    pub available: bool,
}

impl FileRecord {
    fn from_row(row: &DbRow) -> Result<Self, DbError> {
        Ok(Self {
            id: row.get_by_name("id")?,
            sha256: row.get_by_name("sha256")?,
            item_id: row.get_by_name("item_id")?,
            path: row.get_by_name("path")?,
            filename: row.get_by_name("filename")?,
            last_modified: row.get_by_name("last_modified")?,
            available: row.get_by_name("available")?,
        })
    }
}

const FILE_COLS: &str = "id, sha256, item_id, path, filename, last_modified, available";

/// Most recently modified file row for a content hash whose path still
/// exists on disk.
pub fn get_existing_file_for_sha256(
    db: &IndexDb,
    sha256: &str,
) -> Result<Option<FileRecord>, DbError> {
    let rows = db.query_all(
        &format!(
            "SELECT {FILE_COLS} FROM files WHERE sha256 = ? ORDER BY available DESC, last_modified DESC"
        ),
        &[sha256.into()],
    )?;
    for row in rows {
        let record = FileRecord::from_row(&row)?;
        if std::path::Path::new(&record.path).exists() {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Most recently modified reachable file row for an item.
pub fn get_existing_file_for_item_id(
    db: &IndexDb,
    item_id: i64,
) -> Result<Option<FileRecord>, DbError> {
    let rows = db.query_all(
        &format!(
            "SELECT {FILE_COLS} FROM files WHERE item_id = ? ORDER BY available DESC, last_modified DESC"
        ),
        &[item_id.into()],
    )?;
    for row in rows {
        let record = FileRecord::from_row(&row)?;
        if std::path::Path::new(&record.path).exists() {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Item id by content hash.
pub fn get_item_id(db: &IndexDb, sha256: &str) -> Result<Option<i64>, DbError> {
    match db.query_opt("SELECT id FROM items WHERE sha256 = ?", &[sha256.into()])? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Parameters for registering one file under an item.
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub sha256: &'a str,
    pub md5: &'a str,
    pub mime_type: &'a str,
    pub path: &'a str,
    pub last_modified: &'a str,
    pub size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<f64>,
}

/// Insert (or reuse) the item for a content hash and upsert the file path.
///
/// Returns `(item_id, file_id)`.
pub fn upsert_item_file(db: &IndexDb, scan_id: i64, file: &NewFile<'_>) -> Result<(i64, i64), DbError> {
    let item_id = match get_item_id(db, file.sha256)? {
        Some(id) => id,
        None => {
            db.execute(
                r#"
                INSERT INTO items (sha256, md5, type, size, width, height, duration, time_added)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                &[
                    file.sha256.into(),
                    file.md5.into(),
                    file.mime_type.into(),
                    file.size.into(),
                    file.width.into(),
                    file.height.into(),
                    file.duration.into(),
                    Utc::now().to_rfc3339().into(),
                ],
            )?;
            db.last_insert_rowid()
        }
    };

    let filename = std::path::Path::new(file.path)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    db.execute(
        r#"
        INSERT INTO files (sha256, item_id, path, filename, last_modified, scan_id, available)
        VALUES (?, ?, ?, ?, ?, ?, 1)
        ON CONFLICT(path) DO UPDATE SET
            sha256 = excluded.sha256,
            item_id = excluded.item_id,
            last_modified = excluded.last_modified,
            scan_id = excluded.scan_id,
            available = 1
        "#,
        &[
            file.sha256.into(),
            item_id.into(),
            file.path.into(),
            filename.into(),
            file.last_modified.into(),
            scan_id.into(),
        ],
    )?;
    let file_id: i64 = db.query_scalar(
        "SELECT id FROM files WHERE path = ?",
        &[file.path.into()],
    )?;
    Ok((item_id, file_id))
}

/// Open a scan bookkeeping row; returns the scan id.
pub fn start_file_scan(db: &IndexDb, path: &str) -> Result<i64, DbError> {
    db.execute(
        "INSERT INTO file_scans (start_time, path) VALUES (?, ?)",
        &[Utc::now().to_rfc3339().into(), path.into()],
    )?;
    Ok(db.last_insert_rowid())
}

/// Close a scan bookkeeping row with its counters.
pub fn end_file_scan(
    db: &IndexDb,
    scan_id: i64,
    total_available: i64,
    marked_unavailable: i64,
    errors: i64,
) -> Result<(), DbError> {
    db.execute(
        r#"
        UPDATE file_scans
        SET end_time = ?,
            total_available = ?,
            marked_unavailable = ?,
            errors = ?
        WHERE id = ?
        "#,
        &[
            Utc::now().to_rfc3339().into(),
            total_available.into(),
            marked_unavailable.into(),
            errors.into(),
            scan_id.into(),
        ],
    )?;
    Ok(())
}

/// Mark one file row unavailable.
pub fn mark_unavailable(db: &IndexDb, file_id: i64) -> Result<(), DbError> {
    db.execute(
        "UPDATE files SET available = 0 WHERE id = ?",
        &[file_id.into()],
    )?;
    Ok(())
}

/// All file rows currently flagged available.
pub fn list_available_files(db: &IndexDb) -> Result<Vec<FileRecord>, DbError> {
    db.query_all(
        &format!("SELECT {FILE_COLS} FROM files WHERE available = 1 ORDER BY id"),
        &[],
    )?
    .iter()
    .map(FileRecord::from_row)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::init_schema;

    fn test_db() -> IndexDb {
        let db = IndexDb::open_memory().unwrap();
        init_schema(&db).unwrap();
        db
    }

    #[test]
    fn upsert_reuses_item_for_same_hash() {
        let db = test_db();
        let scan_id = start_file_scan(&db, "/media").unwrap();
        let base = NewFile {
            sha256: "abc",
            md5: "m",
            mime_type: "image/png",
            path: "/media/a.png",
            last_modified: "2026-01-01T00:00:00Z",
            size: Some(10),
            width: None,
            height: None,
            duration: None,
        };
        let (item_a, file_a) = upsert_item_file(&db, scan_id, &base).unwrap();
        let (item_b, file_b) = upsert_item_file(
            &db,
            scan_id,
            &NewFile {
                path: "/media/copy.png",
                ..base.clone()
            },
        )
        .unwrap();
        assert_eq!(item_a, item_b);
        assert_ne!(file_a, file_b);

        let items: i64 = db.query_scalar("SELECT COUNT(*) FROM items", &[]).unwrap();
        assert_eq!(items, 1);
    }

    #[test]
    fn existing_file_lookup_skips_missing_paths() {
        let db = test_db();
        let scan_id = start_file_scan(&db, "/media").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.png");
        std::fs::write(&real, b"x").unwrap();

        upsert_item_file(
            &db,
            scan_id,
            &NewFile {
                sha256: "abc",
                md5: "m",
                mime_type: "image/png",
                path: "/definitely/missing.png",
                last_modified: "2026-01-02T00:00:00Z",
                size: None,
                width: None,
                height: None,
                duration: None,
            },
        )
        .unwrap();
        upsert_item_file(
            &db,
            scan_id,
            &NewFile {
                sha256: "abc",
                md5: "m",
                mime_type: "image/png",
                path: real.to_str().unwrap(),
                last_modified: "2026-01-01T00:00:00Z",
                size: None,
                width: None,
                height: None,
                duration: None,
            },
        )
        .unwrap();

        let found = get_existing_file_for_sha256(&db, "abc").unwrap().unwrap();
        assert_eq!(found.path, real.to_str().unwrap());
    }
}
