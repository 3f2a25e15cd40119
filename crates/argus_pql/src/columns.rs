//! Selectable column tables.
//!
//! Columns live on three underlying tables. Text columns are only reachable
//! from text-entity queries, and asking for one anywhere else is a compile
//! error rather than a silent NULL.

use crate::error::PqlError;

/// Where a column physically lives in the final SELECT's join set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnTable {
    Files,
    Items,
    Text,
}

pub const FILE_COLUMNS: &[&str] = &["file_id", "sha256", "path", "filename", "last_modified"];

pub const ITEM_COLUMNS: &[&str] = &[
    "item_id",
    "md5",
    "type",
    "size",
    "width",
    "height",
    "duration",
    "time_added",
    "audio_tracks",
    "video_tracks",
    "subtitle_tracks",
    "blurhash",
];

pub const TEXT_COLUMNS: &[&str] = &[
    "data_id",
    "language",
    "language_confidence",
    "confidence",
    "text",
    "text_length",
    "job_id",
    "setter_id",
    "setter_name",
    "data_index",
    "source_id",
];

/// Qualified SQL expression for a column in the final SELECT.
pub fn qualified(column: &str) -> Result<(&'static str, ColumnTable), PqlError> {
    let spec: (&'static str, ColumnTable) = match column {
        "file_id" => ("files.id", ColumnTable::Files),
        "sha256" => ("files.sha256", ColumnTable::Files),
        "path" => ("files.path", ColumnTable::Files),
        "filename" => ("files.filename", ColumnTable::Files),
        "last_modified" => ("files.last_modified", ColumnTable::Files),
        "item_id" => ("items.id", ColumnTable::Items),
        "md5" => ("items.md5", ColumnTable::Items),
        "type" => ("items.type", ColumnTable::Items),
        "size" => ("items.size", ColumnTable::Items),
        "width" => ("items.width", ColumnTable::Items),
        "height" => ("items.height", ColumnTable::Items),
        "duration" => ("items.duration", ColumnTable::Items),
        "time_added" => ("items.time_added", ColumnTable::Items),
        "audio_tracks" => ("items.audio_tracks", ColumnTable::Items),
        "video_tracks" => ("items.video_tracks", ColumnTable::Items),
        "subtitle_tracks" => ("items.subtitle_tracks", ColumnTable::Items),
        "blurhash" => ("items.blurhash", ColumnTable::Items),
        "data_id" => ("extracted_text.id", ColumnTable::Text),
        "language" => ("extracted_text.language", ColumnTable::Text),
        "language_confidence" => ("extracted_text.language_confidence", ColumnTable::Text),
        "confidence" => ("extracted_text.confidence", ColumnTable::Text),
        "text" => ("extracted_text.text", ColumnTable::Text),
        "text_length" => ("extracted_text.text_length", ColumnTable::Text),
        "job_id" => ("item_data.job_id", ColumnTable::Text),
        "setter_id" => ("item_data.setter_id", ColumnTable::Text),
        "setter_name" => ("setters.name", ColumnTable::Text),
        "data_index" => ("item_data.idx", ColumnTable::Text),
        "source_id" => ("item_data.source_id", ColumnTable::Text),
        other => return Err(PqlError::UnknownColumn(other.to_string())),
    };
    Ok(spec)
}

pub fn is_text_column(column: &str) -> bool {
    TEXT_COLUMNS.contains(&column)
}

pub fn contains_text_columns<'a>(columns: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    columns.into_iter().find(|c| is_text_column(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_column_is_an_error() {
        assert!(qualified("no_such_column").is_err());
    }

    #[test]
    fn text_columns_are_classified() {
        assert!(is_text_column("text"));
        assert!(is_text_column("setter_name"));
        assert!(!is_text_column("path"));
        assert_eq!(
            contains_text_columns(["path", "language"]),
            Some("language")
        );
    }
}
