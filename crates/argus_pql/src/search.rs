//! Search execution: counting, row mapping, path re-resolution, metrics.

use crate::builder::{build_query, prepare_query, CompiledQuery};
use crate::error::PqlError;
use crate::filters::embeddings::QueryEmbedder;
use crate::model::{Entity, PqlQuery};
use argus_db::files::get_existing_file_for_item_id;
use argus_db::{DbValue, IndexDb};
use base64::Engine;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

/// Timing of one compiled statement's lifecycle.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SearchMetrics {
    /// Query tree → SQL text.
    pub build: f64,
    /// SQL text → prepared statement.
    pub compile: f64,
    /// Statement execution and row iteration.
    pub execute: f64,
}

/// One result row.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResult {
    pub file_id: i64,
    pub item_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_id: Option<i64>,
    pub path: String,
    pub sha256: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub last_modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_added: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_tracks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_tracks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_tracks: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setter_name: Option<String>,
    /// Filter-contributed columns, keyed by their `select_as` alias.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A full search response.
#[derive(Debug, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub total: i64,
    pub metrics: SearchMetrics,
    pub count_metrics: SearchMetrics,
}

fn secs(start: Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

/// Run a prepared query, invoking `on_result` per row with the remaining
/// count after it. Return false from the callback to stop early.
pub fn search_stream(
    db: &IndexDb,
    query: &PqlQuery,
    mut on_result: impl FnMut(SearchResult, i64) -> Result<bool, PqlError>,
) -> Result<(i64, SearchMetrics, SearchMetrics), PqlError> {
    let mut count_metrics = SearchMetrics::default();
    let mut metrics = SearchMetrics::default();

    let total = if query.count {
        let start = Instant::now();
        let compiled = build_query(query, true)?;
        count_metrics.build = secs(start);
        let (total, compile, execute) = execute_count(db, &compiled)?;
        count_metrics.compile = compile;
        count_metrics.execute = execute;
        total
    } else {
        0
    };

    if !query.results {
        return Ok((total, metrics, count_metrics));
    }

    let start = Instant::now();
    let compiled = build_query(query, false)?;
    metrics.build = secs(start);
    debug!(sql = %compiled.sql, "executing search");

    let start = Instant::now();
    let mut stmt = db
        .raw()
        .prepare(&compiled.sql)
        .map_err(argus_db::DbError::from)?;
    metrics.compile = secs(start);

    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect();

    let start = Instant::now();
    let mut rows = stmt
        .query(rusqlite::params_from_iter(compiled.params.iter()))
        .map_err(argus_db::DbError::from)?;

    let mut seen: i64 = 0;
    while let Some(row) = rows.next().map_err(argus_db::DbError::from)? {
        seen += 1;
        let mut result = map_row(row, &column_names, &compiled)?;
        if query.check_path && !result.path.is_empty() && !std::path::Path::new(&result.path).exists()
        {
            if query.entity == Entity::File && query.partition_by.is_none() {
                warn!("File not found: {}", result.path);
                continue;
            }
            warn!("Result path not found: {}", result.path);
            match get_existing_file_for_item_id(db, result.item_id)? {
                Some(file) => {
                    result.path = file.path;
                    result.last_modified = file.last_modified;
                    result.filename = Some(file.filename);
                }
                None => {
                    warn!("No reachable file for item: {}", result.sha256);
                    continue;
                }
            }
        }
        let remaining = (total - seen).max(0);
        if !on_result(result, remaining)? {
            break;
        }
    }
    metrics.execute = secs(start);

    Ok((total, metrics, count_metrics))
}

/// Validate, compile and execute a query, collecting the page of results.
pub fn search(
    db: &IndexDb,
    query: PqlQuery,
    embedder: &dyn QueryEmbedder,
) -> Result<SearchOutcome, PqlError> {
    let query = prepare_query(query, embedder)?;
    let mut results = Vec::new();
    let (total, metrics, count_metrics) = search_stream(db, &query, |result, _remaining| {
        results.push(result);
        Ok(true)
    })?;
    Ok(SearchOutcome {
        results,
        total,
        metrics,
        count_metrics,
    })
}

fn execute_count(db: &IndexDb, compiled: &CompiledQuery) -> Result<(i64, f64, f64), PqlError> {
    let start = Instant::now();
    let mut stmt = db
        .raw()
        .prepare(&compiled.sql)
        .map_err(argus_db::DbError::from)?;
    let compile = secs(start);

    let start = Instant::now();
    let total: i64 = stmt
        .query_row(rusqlite::params_from_iter(compiled.params.iter()), |row| {
            row.get(0)
        })
        .map_err(argus_db::DbError::from)?;
    Ok((total, compile, secs(start)))
}

fn map_row(
    row: &rusqlite::Row<'_>,
    column_names: &[String],
    compiled: &CompiledQuery,
) -> Result<SearchResult, PqlError> {
    let mut result = SearchResult::default();
    for (i, name) in column_names.iter().enumerate() {
        let value = DbValue::from_sql_ref(row.get_ref(i).map_err(argus_db::DbError::from)?);
        assign_column(&mut result, name, value, compiled);
    }
    Ok(result)
}

fn assign_column(result: &mut SearchResult, name: &str, value: DbValue, compiled: &CompiledQuery) {
    match name {
        "file_id" => result.file_id = as_i64(&value).unwrap_or_default(),
        "item_id" => result.item_id = as_i64(&value).unwrap_or_default(),
        "data_id" => result.data_id = as_i64(&value),
        "path" => result.path = as_string(value).unwrap_or_default(),
        "sha256" => result.sha256 = as_string(value).unwrap_or_default(),
        "type" => result.mime_type = as_string(value).unwrap_or_default(),
        "last_modified" => result.last_modified = as_string(value).unwrap_or_default(),
        "filename" => result.filename = as_string(value),
        "md5" => result.md5 = as_string(value),
        "size" => result.size = as_i64(&value),
        "width" => result.width = as_i64(&value),
        "height" => result.height = as_i64(&value),
        "duration" => result.duration = as_f64(&value),
        "time_added" => result.time_added = as_string(value),
        "audio_tracks" => result.audio_tracks = as_i64(&value),
        "video_tracks" => result.video_tracks = as_i64(&value),
        "subtitle_tracks" => result.subtitle_tracks = as_i64(&value),
        "language" => result.language = as_string(value),
        "language_confidence" => result.language_confidence = as_f64(&value),
        "confidence" => result.confidence = as_f64(&value),
        "text" => result.text = as_string(value),
        "text_length" => result.text_length = as_i64(&value),
        "setter_name" => result.setter_name = as_string(value),
        other => {
            if let Some(index) = other
                .strip_prefix("extra_")
                .and_then(|s| s.parse::<usize>().ok())
            {
                if let Some(alias) = compiled.extra_aliases.get(index) {
                    result.extra.insert(alias.clone(), to_json(value));
                }
            }
        }
    }
}

fn as_i64(value: &DbValue) -> Option<i64> {
    match value {
        DbValue::Integer(v) => Some(*v),
        _ => None,
    }
}

fn as_f64(value: &DbValue) -> Option<f64> {
    match value {
        DbValue::Real(v) => Some(*v),
        DbValue::Integer(v) => Some(*v as f64),
        _ => None,
    }
}

fn as_string(value: DbValue) -> Option<String> {
    match value {
        DbValue::Text(v) => Some(v),
        _ => None,
    }
}

fn to_json(value: DbValue) -> serde_json::Value {
    match value {
        DbValue::Null => serde_json::Value::Null,
        DbValue::Integer(v) => serde_json::Value::from(v),
        DbValue::Real(v) => serde_json::Value::from(v),
        DbValue::Text(v) => serde_json::Value::String(v),
        DbValue::Blob(v) => serde_json::Value::String(
            base64::engine::general_purpose::STANDARD.encode(v),
        ),
    }
}
