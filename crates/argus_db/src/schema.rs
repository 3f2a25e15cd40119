//! Index database schema.
//!
//! All timestamps are ISO-8601 text. The `item_data` table anchors every
//! model output; deleting a `data_jobs` row cascades through it, which is
//! what makes extraction jobs atomic.

use crate::connection::IndexDb;
use crate::error::DbError;

const SCHEMA_SQL: &str = r#"
-- Source items, deduplicated by content hash
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    sha256 TEXT UNIQUE NOT NULL,
    md5 TEXT NOT NULL,
    type TEXT NOT NULL,              -- Mime type of the file (e.g. image/jpeg)
    size INTEGER,                    -- Size of the file in bytes
    width INTEGER,                   -- Width of the frame in pixels
    height INTEGER,                  -- Height of the frame in pixels
    duration REAL,                   -- Duration of the video/audio in seconds
    audio_tracks INTEGER,            -- Number of audio tracks
    video_tracks INTEGER,            -- Number of video tracks
    subtitle_tracks INTEGER,         -- Number of subtitle tracks
    time_added TEXT NOT NULL,
    blurhash TEXT
);

-- Paths where an item has been seen
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    sha256 TEXT NOT NULL,
    item_id INTEGER NOT NULL,
    path TEXT UNIQUE NOT NULL,
    filename TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    scan_id INTEGER NOT NULL,
    available BOOLEAN NOT NULL,
    FOREIGN KEY(item_id) REFERENCES items(id),
    FOREIGN KEY(scan_id) REFERENCES file_scans(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS file_scans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time TEXT NOT NULL,
    end_time TEXT,
    path TEXT NOT NULL,
    total_available INTEGER NOT NULL DEFAULT 0,
    new_items INTEGER NOT NULL DEFAULT 0,
    unchanged_files INTEGER NOT NULL DEFAULT 0,
    new_files INTEGER NOT NULL DEFAULT 0,
    modified_files INTEGER NOT NULL DEFAULT 0,
    marked_unavailable INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0
);

-- Models that have written data into this index
CREATE TABLE IF NOT EXISTS setters (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

-- Anchor rows for extraction jobs; deleting one cascades its outputs
CREATE TABLE IF NOT EXISTS data_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    completed BOOLEAN NOT NULL DEFAULT 0
);

-- Progress/statistics log, survives job deletion via SET NULL
CREATE TABLE IF NOT EXISTS data_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    type TEXT NOT NULL,
    setter TEXT NOT NULL,
    threshold REAL DEFAULT NULL,
    batch_size INTEGER NOT NULL,
    image_files INTEGER NOT NULL DEFAULT 0,
    video_files INTEGER NOT NULL DEFAULT 0,
    other_files INTEGER NOT NULL DEFAULT 0,
    total_segments INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    total_remaining INTEGER NOT NULL DEFAULT 0,
    data_load_time REAL DEFAULT 0,
    inference_time REAL DEFAULT 0,
    completed BOOLEAN NOT NULL DEFAULT 0,
    FOREIGN KEY(job_id) REFERENCES data_jobs(id) ON DELETE SET NULL
);

-- Derived data: one row per model output (or placeholder)
CREATE TABLE IF NOT EXISTS item_data (
    id INTEGER PRIMARY KEY,
    item_id INTEGER NOT NULL,
    job_id INTEGER,
    setter_id INTEGER NOT NULL,
    data_type TEXT NOT NULL,
    idx INTEGER NOT NULL,             -- Index of the data in the item (page, frame, ...)
    source_id INTEGER,                -- Data this row was derived from, if any
    is_origin BOOLEAN,                -- True when derived directly from the item, NULL otherwise
    is_placeholder BOOLEAN,           -- Marks "processed, no output"
    UNIQUE(item_id, setter_id, data_type, idx, is_origin),
    UNIQUE(item_id, setter_id, data_type, idx, source_id),
    FOREIGN KEY(item_id) REFERENCES items(id) ON DELETE CASCADE,
    FOREIGN KEY(job_id) REFERENCES data_jobs(id) ON DELETE CASCADE,
    FOREIGN KEY(setter_id) REFERENCES setters(id) ON DELETE CASCADE,
    FOREIGN KEY(source_id) REFERENCES item_data(id) ON DELETE CASCADE,
    CHECK ((is_origin = TRUE AND source_id IS NULL) OR (is_origin IS NULL AND source_id IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS extracted_text (
    id INTEGER PRIMARY KEY,
    language TEXT,
    language_confidence REAL,
    confidence REAL,
    text TEXT NOT NULL,
    text_length INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY(id) REFERENCES item_data(id) ON DELETE CASCADE
);

CREATE VIRTUAL TABLE IF NOT EXISTS extracted_text_fts
USING fts5(
    text,
    content="extracted_text",
    content_rowid="id",
    tokenize="trigram case_sensitive 0"
);

CREATE TRIGGER IF NOT EXISTS extracted_text_ai AFTER INSERT ON extracted_text BEGIN
    INSERT INTO extracted_text_fts(rowid, text)
    VALUES (new.id, new.text);
END;

CREATE TRIGGER IF NOT EXISTS extracted_text_ad AFTER DELETE ON extracted_text BEGIN
    INSERT INTO extracted_text_fts(extracted_text_fts, rowid, text)
    VALUES('delete', old.id, old.text);
END;

CREATE TRIGGER IF NOT EXISTS extracted_text_au AFTER UPDATE ON extracted_text BEGIN
    INSERT INTO extracted_text_fts(extracted_text_fts, rowid, text)
    VALUES('delete', old.id, old.text);
    INSERT INTO extracted_text_fts(rowid, text)
    VALUES (new.id, new.text);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS files_path_fts
USING fts5(
    path,
    filename,
    content='files',
    content_rowid='id',
    tokenize='trigram case_sensitive 0'
);

CREATE TRIGGER IF NOT EXISTS files_path_ai AFTER INSERT ON files BEGIN
    INSERT INTO files_path_fts(rowid, path, filename)
    VALUES (new.id, new.path, new.filename);
END;

CREATE TRIGGER IF NOT EXISTS files_path_ad AFTER DELETE ON files BEGIN
    INSERT INTO files_path_fts(files_path_fts, rowid, path, filename)
    VALUES('delete', old.id, old.path, old.filename);
END;

CREATE TRIGGER IF NOT EXISTS files_path_au AFTER UPDATE ON files BEGIN
    INSERT INTO files_path_fts(files_path_fts, rowid, path, filename)
    VALUES('delete', old.id, old.path, old.filename);
    INSERT INTO files_path_fts(rowid, path, filename)
    VALUES (new.id, new.path, new.filename);
END;

CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY,
    embedding BLOB NOT NULL,          -- float[] little-endian
    FOREIGN KEY(id) REFERENCES item_data(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY,
    namespace TEXT NOT NULL,
    name TEXT NOT NULL,
    UNIQUE(namespace, name)
);

CREATE TABLE IF NOT EXISTS tags_items (
    item_data_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    confidence REAL DEFAULT 1.0,
    UNIQUE(item_data_id, tag_id),
    FOREIGN KEY(item_data_id) REFERENCES item_data(id) ON DELETE CASCADE,
    FOREIGN KEY(tag_id) REFERENCES tags(id) ON DELETE CASCADE
);

-- Indexed folder roots (included or specifically excluded)
CREATE TABLE IF NOT EXISTS folders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    time_added TEXT NOT NULL,
    path TEXT NOT NULL,
    included BOOLEAN NOT NULL,
    UNIQUE(path)
);

-- Per-index key/value settings (cron schedule, configured models, filters)
CREATE TABLE IF NOT EXISTS system_config (
    k TEXT NOT NULL UNIQUE,
    v TEXT
);

CREATE INDEX IF NOT EXISTS idx_items_md5 ON items(md5);
CREATE INDEX IF NOT EXISTS idx_items_type ON items(type);
CREATE INDEX IF NOT EXISTS idx_items_time_added ON items(time_added);
CREATE INDEX IF NOT EXISTS idx_files_sha256 ON files(sha256);
CREATE INDEX IF NOT EXISTS idx_files_last_modified ON files(last_modified);
CREATE INDEX IF NOT EXISTS idx_files_available ON files(available);
CREATE INDEX IF NOT EXISTS idx_files_item_id ON files(item_id);
CREATE INDEX IF NOT EXISTS idx_data_log_start_time ON data_log(start_time);
CREATE INDEX IF NOT EXISTS idx_data_log_setter ON data_log(setter);
CREATE INDEX IF NOT EXISTS idx_data_log_job_id ON data_log(job_id);
CREATE INDEX IF NOT EXISTS idx_item_data_item_id ON item_data(item_id);
CREATE INDEX IF NOT EXISTS idx_item_data_job_id ON item_data(job_id);
CREATE INDEX IF NOT EXISTS idx_item_data_setter_id ON item_data(setter_id);
CREATE INDEX IF NOT EXISTS idx_item_data_source_id ON item_data(source_id);
CREATE INDEX IF NOT EXISTS idx_item_data_data_type ON item_data(data_type);
CREATE INDEX IF NOT EXISTS idx_item_data_is_placeholder ON item_data(is_placeholder);
CREATE INDEX IF NOT EXISTS idx_tags_items_tag_id ON tags_items(tag_id);
CREATE INDEX IF NOT EXISTS idx_tags_namespace_name ON tags(namespace, name);
CREATE INDEX IF NOT EXISTS idx_extracted_text_language ON extracted_text(language);
CREATE INDEX IF NOT EXISTS idx_extracted_text_confidence ON extracted_text(confidence);
CREATE INDEX IF NOT EXISTS idx_setters_name ON setters(name);
CREATE INDEX IF NOT EXISTS idx_folders_path ON folders(path);
"#;

/// Create all tables, triggers and indexes if they do not exist.
pub fn init_schema(db: &IndexDb) -> Result<(), DbError> {
    db.execute_batch(SCHEMA_SQL)
}
