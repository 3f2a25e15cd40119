//! HTTP surface of the inference service.
//!
//! Thin request/response adapter: multipart parsing on the way in, the
//! shared wire codec on the way out. All model lifecycle logic lives in the
//! manager.

use crate::error::InferdError;
use crate::manager::ModelManager;
use argus_protocol::wire::{encode_outputs, index_from_content_disposition};
use argus_protocol::{InferenceId, PredictionInput};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Deserialize)]
pub struct CacheParams {
    pub cache_key: String,
    pub lru_size: u32,
    pub ttl_seconds: i64,
}

pub fn router(manager: Arc<ModelManager>) -> Router {
    Router::new()
        .route("/predict/:group/:name", axum::routing::post(predict))
        .route("/load/:group/:name", put(load_model))
        .route("/cache/:cache_key/:group/:name", delete(unload_model))
        .route("/cache/:cache_key", delete(clear_cache).get(get_expirations))
        .route("/cache", get(get_cached_models))
        .route("/metadata", get(get_metadata))
        .with_state(manager)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    (
        status,
        Json(serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        })),
    )
        .into_response()
}

fn status_for(err: &InferdError) -> StatusCode {
    match err {
        InferdError::UnknownGroup(_)
        | InferdError::UnknownInferenceId(_)
        | InferdError::UnknownImplClass(_) => StatusCode::NOT_FOUND,
        InferdError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Parse the multipart predict request into a dense input batch.
async fn parse_input_request(
    mut multipart: Multipart,
) -> Result<Vec<PredictionInput>, InferdError> {
    let mut inputs: Vec<PredictionInput> = Vec::new();
    let mut files: Vec<(usize, Vec<u8>)> = Vec::new();
    let mut saw_data = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InferdError::InvalidRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("data") {
            let raw = field
                .text()
                .await
                .map_err(|e| InferdError::InvalidRequest(format!("unreadable data field: {e}")))?;
            let parsed: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| InferdError::InvalidRequest(format!("invalid data JSON: {e}")))?;
            let array = parsed
                .get("inputs")
                .and_then(|v| v.as_array())
                .ok_or_else(|| {
                    InferdError::InvalidRequest("data JSON must carry an 'inputs' array".into())
                })?;
            saw_data = true;
            inputs = array
                .iter()
                .map(|item| match item {
                    serde_json::Value::Null => PredictionInput::default(),
                    other => PredictionInput::from_data(other.clone()),
                })
                .collect();
        } else {
            // Binary part: the filename is the batch index.
            let disposition = field
                .file_name()
                .map(|f| format!("attachment; filename=\"{f}\""))
                .ok_or_else(|| {
                    InferdError::InvalidRequest("file part without a filename".into())
                })?;
            let index = index_from_content_disposition(&disposition).ok_or_else(|| {
                InferdError::InvalidRequest(format!(
                    "file part filename is not a batch index: {disposition}"
                ))
            })?;
            let bytes = field
                .bytes()
                .await
                .map_err(|e| InferdError::InvalidRequest(format!("unreadable file part: {e}")))?;
            files.push((index, bytes.to_vec()));
        }
    }

    if !saw_data || inputs.is_empty() {
        return Err(InferdError::InvalidRequest("no inputs provided".into()));
    }
    for (index, bytes) in files {
        let slot = inputs.get_mut(index).ok_or_else(|| {
            InferdError::InvalidRequest(format!("file index {index} out of range"))
        })?;
        slot.file = Some(bytes);
    }
    Ok(inputs)
}

async fn predict(
    State(manager): State<Arc<ModelManager>>,
    Path((group, name)): Path<(String, String)>,
    Query(params): Query<CacheParams>,
    multipart: Multipart,
) -> Response {
    let id = InferenceId::new(&group, &name);
    let inputs = match parse_input_request(multipart).await {
        Ok(inputs) => inputs,
        Err(e) => return error_response(status_for(&e), e.to_string()),
    };
    debug!("Predict: {} inputs for {id}", inputs.len());

    // Pin the model for the duration of the call; the caller's TTL is
    // applied afterwards, error or not.
    let handle = match manager
        .load_model(&id, &params.cache_key, params.lru_size, -1)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to load model {id}: {e}");
            return error_response(status_for(&e), e.to_string());
        }
    };

    let result = handle.predict(inputs).await;
    if let Err(e) = manager
        .load_model(&id, &params.cache_key, params.lru_size, params.ttl_seconds)
        .await
    {
        error!("Failed to refresh TTL for {id}: {e}");
    }

    let outputs = match result {
        Ok(outputs) => outputs,
        Err(e) => {
            error!("Prediction failed for {id}: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Prediction failed");
        }
    };

    match encode_outputs(&outputs) {
        Ok(encoded) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoded.content_type)],
            encoded.body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode outputs for {id}: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn load_model(
    State(manager): State<Arc<ModelManager>>,
    Path((group, name)): Path<(String, String)>,
    Query(params): Query<CacheParams>,
) -> Response {
    let id = InferenceId::new(&group, &name);
    match manager
        .load_model(&id, &params.cache_key, params.lru_size, params.ttl_seconds)
        .await
    {
        Ok(_) => Json(serde_json::json!({ "status": "loaded" })).into_response(),
        Err(e) => {
            error!("Failed to load model {id}: {e}");
            error_response(status_for(&e), e.to_string())
        }
    }
}

async fn unload_model(
    State(manager): State<Arc<ModelManager>>,
    Path((cache_key, group, name)): Path<(String, String, String)>,
) -> Response {
    let id = InferenceId::new(&group, &name);
    manager.unload_model(&cache_key, &id).await;
    Json(serde_json::json!({ "status": "unloaded" })).into_response()
}

async fn clear_cache(
    State(manager): State<Arc<ModelManager>>,
    Path(cache_key): Path<String>,
) -> Response {
    manager.clear_cache(&cache_key).await;
    Json(serde_json::json!({ "status": "cleared" })).into_response()
}

async fn get_expirations(
    State(manager): State<Arc<ModelManager>>,
    Path(cache_key): Path<String>,
) -> Response {
    let expirations = manager.get_ttl_expiration(&cache_key).await;
    let expirations: serde_json::Map<String, serde_json::Value> = expirations
        .into_iter()
        .map(|(id, expiry)| {
            let value = match expiry {
                Some(t) => serde_json::Value::String(t.to_rfc3339()),
                None => serde_json::Value::Null,
            };
            (id, value)
        })
        .collect();
    Json(serde_json::json!({ "expirations": expirations })).into_response()
}

async fn get_cached_models(State(manager): State<Arc<ModelManager>>) -> Response {
    let cache = manager.list_loaded_models().await;
    Json(serde_json::json!({ "cache": cache })).into_response()
}

async fn get_metadata(State(manager): State<Arc<ModelManager>>) -> Response {
    match manager.snapshot().await {
        Ok(snapshot) => Json(snapshot.list_inference_ids()).into_response(),
        Err(e) => {
            error!("Failed to load configuration: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
