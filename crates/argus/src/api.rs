//! Index API: job control, job history, and search.

use argus_client::DistributedClient;
use argus_db::extraction_log::get_all_data_logs;
use argus_db::{paths, AccessMode, IndexDb};
use argus_engine::jobs::manager::JobManager;
use argus_pql::{EmbedArgs, PqlQuery, QueryEmbedder};
use argus_protocol::{JobModel, JobSpec, JobType, PredictionInput, QueueStatus};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<JobManager>,
    pub client: Arc<DistributedClient>,
}

pub fn router(manager: Arc<JobManager>, client: Arc<DistributedClient>) -> Router {
    let state = ApiState { manager, client };
    Router::new()
        .route("/api/jobs/queue", get(get_queue).delete(cancel_queued))
        .route("/api/jobs/cancel", post(cancel_current))
        .route(
            "/api/jobs/data/extraction",
            post(enqueue_extraction).delete(enqueue_deletion),
        )
        .route("/api/jobs/data/log/:log_id", delete(enqueue_log_deletion))
        .route("/api/jobs/folders/rescan", post(enqueue_rescan))
        .route("/api/jobs/folders/update", post(enqueue_folder_update))
        .route("/api/jobs/history", get(get_history))
        .route("/api/search", post(run_search))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into(),
            "status": status.as_u16(),
        })),
    )
        .into_response()
}

fn require_index_db(index_db: &str) -> Result<std::path::PathBuf, Response> {
    let path = paths::index_db_path(index_db);
    if !path.exists() {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("index database not found: {index_db}"),
        ));
    }
    Ok(path)
}

fn default_index_db() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
struct IndexDbParams {
    #[serde(default = "default_index_db")]
    index_db: String,
}

async fn get_queue(State(state): State<ApiState>) -> Json<QueueStatus> {
    Json(state.manager.get_queue_status())
}

#[derive(Debug, Deserialize)]
struct CancelParams {
    /// Comma-separated queue ids.
    queue_ids: String,
}

async fn cancel_queued(
    State(state): State<ApiState>,
    Query(params): Query<CancelParams>,
) -> Response {
    let ids: Vec<i64> = params
        .queue_ids
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    let cancelled = state.manager.cancel(&ids);
    Json(serde_json::json!({ "cancelled": cancelled })).into_response()
}

async fn cancel_current(State(state): State<ApiState>) -> Response {
    match state.manager.cancel_current() {
        Some(queue_id) => Json(serde_json::json!({ "cancelled": queue_id })).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no job is running"),
    }
}

#[derive(Debug, Deserialize)]
struct ExtractionParams {
    /// Comma-separated inference ids.
    inference_ids: String,
    #[serde(default = "default_index_db")]
    index_db: String,
    #[serde(default)]
    batch_size: Option<u32>,
    #[serde(default)]
    threshold: Option<f64>,
}

async fn enqueue_extraction(
    State(state): State<ApiState>,
    Query(params): Query<ExtractionParams>,
) -> Response {
    if let Err(response) = require_index_db(&params.index_db) {
        return response;
    }
    let mut jobs = Vec::new();
    for inference_id in params.inference_ids.split(',').map(str::trim) {
        if inference_id.is_empty() {
            continue;
        }
        let spec = JobSpec {
            queue_id: state.manager.next_job_id(),
            job_type: JobType::DataExtraction,
            index_db: params.index_db.clone(),
            inference_id: Some(inference_id.to_string()),
            batch_size: params.batch_size,
            threshold: params.threshold,
            log_id: None,
            tag: None,
        };
        state.manager.enqueue(spec.clone());
        jobs.push(JobModel::from_spec(&spec, false));
    }
    if jobs.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "no inference ids given");
    }
    Json(jobs).into_response()
}

async fn enqueue_deletion(
    State(state): State<ApiState>,
    Query(params): Query<ExtractionParams>,
) -> Response {
    if let Err(response) = require_index_db(&params.index_db) {
        return response;
    }
    let mut jobs = Vec::new();
    for inference_id in params.inference_ids.split(',').map(str::trim) {
        if inference_id.is_empty() {
            continue;
        }
        let spec = JobSpec {
            queue_id: state.manager.next_job_id(),
            job_type: JobType::DataDeletion,
            index_db: params.index_db.clone(),
            inference_id: Some(inference_id.to_string()),
            batch_size: None,
            threshold: None,
            log_id: None,
            tag: None,
        };
        state.manager.enqueue(spec.clone());
        jobs.push(JobModel::from_spec(&spec, false));
    }
    Json(jobs).into_response()
}

async fn enqueue_log_deletion(
    State(state): State<ApiState>,
    Path(log_id): Path<i64>,
    Query(params): Query<IndexDbParams>,
) -> Response {
    if let Err(response) = require_index_db(&params.index_db) {
        return response;
    }
    let spec = JobSpec {
        queue_id: state.manager.next_job_id(),
        job_type: JobType::JobDataDeletion,
        index_db: params.index_db.clone(),
        inference_id: None,
        batch_size: None,
        threshold: None,
        log_id: Some(log_id),
        tag: None,
    };
    state.manager.enqueue(spec.clone());
    Json(JobModel::from_spec(&spec, false)).into_response()
}

async fn enqueue_rescan(
    State(state): State<ApiState>,
    Query(params): Query<IndexDbParams>,
) -> Response {
    enqueue_simple(&state, &params.index_db, JobType::FolderRescan)
}

async fn enqueue_folder_update(
    State(state): State<ApiState>,
    Query(params): Query<IndexDbParams>,
) -> Response {
    enqueue_simple(&state, &params.index_db, JobType::FolderUpdate)
}

fn enqueue_simple(state: &ApiState, index_db: &str, job_type: JobType) -> Response {
    if let Err(response) = require_index_db(index_db) {
        return response;
    }
    let spec = JobSpec {
        queue_id: state.manager.next_job_id(),
        job_type,
        index_db: index_db.to_string(),
        inference_id: None,
        batch_size: None,
        threshold: None,
        log_id: None,
        tag: None,
    };
    state.manager.enqueue(spec.clone());
    Json(JobModel::from_spec(&spec, false)).into_response()
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default = "default_index_db")]
    index_db: String,
    #[serde(default)]
    page: Option<i64>,
    #[serde(default)]
    page_size: Option<i64>,
}

async fn get_history(Query(params): Query<HistoryParams>) -> Response {
    let path = match require_index_db(&params.index_db) {
        Ok(path) => path,
        Err(response) => return response,
    };
    let result = tokio::task::spawn_blocking(move || {
        let db = IndexDb::open(&path, AccessMode::ReadOnly)?;
        get_all_data_logs(&db, params.page, params.page_size)
    })
    .await;
    match result {
        Ok(Ok(logs)) => Json(serde_json::json!({ "logs": logs })).into_response(),
        Ok(Err(e)) => {
            error!("Failed to read job history: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Embeds semantic queries through the inference service.
struct ApiEmbedder {
    handle: tokio::runtime::Handle,
    client: Arc<DistributedClient>,
}

impl QueryEmbedder for ApiEmbedder {
    fn embed(&self, text: &str, model: &str, args: &EmbedArgs) -> Result<Vec<u8>, String> {
        let input = PredictionInput::from_data(serde_json::json!({ "text": text }));
        let outputs = self
            .handle
            .block_on(self.client.predict(
                model,
                &args.cache_key,
                args.lru_size,
                args.ttl_seconds,
                vec![input],
            ))
            .map_err(|e| e.to_string())?;
        outputs
            .first()
            .and_then(|o| o.as_binary())
            .map(|b| b.to_vec())
            .ok_or_else(|| format!("model {model} returned no embedding"))
    }
}

async fn run_search(
    State(state): State<ApiState>,
    Query(params): Query<IndexDbParams>,
    Json(query): Json<PqlQuery>,
) -> Response {
    let path = match require_index_db(&params.index_db) {
        Ok(path) => path,
        Err(response) => return response,
    };
    let embedder = ApiEmbedder {
        handle: tokio::runtime::Handle::current(),
        client: Arc::clone(&state.client),
    };
    let result = tokio::task::spawn_blocking(move || {
        let db = IndexDb::open(&path, AccessMode::ReadOnly)?;
        argus_pql::search(&db, query, &embedder)
    })
    .await;
    match result {
        Ok(Ok(outcome)) => Json(outcome).into_response(),
        Ok(Err(e)) => {
            error!("Search failed: {e}");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
