//! Single-endpoint client.

use crate::error::ClientError;
use argus_protocol::wire::decode_outputs;
use argus_protocol::{OutputValue, PredictionInput};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Client for one inference server.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    base_url: String,
    client: reqwest::Client,
    retries: u32,
}

impl InferenceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_retries(base_url, DEFAULT_RETRIES)
    }

    pub fn with_retries(base_url: impl Into<String>, retries: u32) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            retries,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request built by `build`, retrying with exponential backoff on
    /// 429/502/503/504 and connection errors.
    async fn send_with_retry(
        &self,
        build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ClientError> {
        let mut attempt = 0u32;
        loop {
            let result: Result<std::convert::Infallible, ClientError> = match build(&self.client).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    Err(ClientError::Status {
                        status: status.as_u16(),
                        body,
                    })
                }
                Err(e) => Err(ClientError::Http(e)),
            };

            let err = result.expect_err("loop continues only on error");
            if attempt >= self.retries || !err.is_retryable() {
                return Err(err);
            }
            let backoff = BACKOFF_BASE
                .saturating_mul(1 << attempt.min(8))
                .min(BACKOFF_CAP);
            warn!(
                "Request to {} failed ({err}), retrying in {:?}",
                self.base_url, backoff
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    /// Batch prediction. Binary inputs become multipart parts whose
    /// filenames are the batch indices.
    pub async fn predict(
        &self,
        inference_id: &str,
        cache_key: &str,
        lru_size: u32,
        ttl_seconds: i64,
        inputs: &[PredictionInput],
    ) -> Result<Vec<OutputValue>, ClientError> {
        let url = format!("{}/predict/{inference_id}", self.base_url);
        let data = serde_json::json!({
            "inputs": inputs
                .iter()
                .map(|i| i.data.clone().unwrap_or(serde_json::Value::Null))
                .collect::<Vec<_>>(),
        })
        .to_string();

        let response = self
            .send_with_retry(|client| {
                let mut form = reqwest::multipart::Form::new().text("data", data.clone());
                for (index, input) in inputs.iter().enumerate() {
                    if let Some(file) = &input.file {
                        let part = reqwest::multipart::Part::bytes(file.clone())
                            .file_name(index.to_string())
                            .mime_str("application/octet-stream")
                            .expect("static mime type");
                        form = form.part("files", part);
                    }
                }
                client
                    .post(&url)
                    .query(&[
                        ("cache_key", cache_key.to_string()),
                        ("lru_size", lru_size.to_string()),
                        ("ttl_seconds", ttl_seconds.to_string()),
                    ])
                    .multipart(form)
            })
            .await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await?;
        debug!(
            "Predict response: {} bytes of {content_type} from {}",
            body.len(),
            self.base_url
        );
        Ok(decode_outputs(&content_type, &body)?)
    }

    pub async fn load_model(
        &self,
        inference_id: &str,
        cache_key: &str,
        lru_size: u32,
        ttl_seconds: i64,
    ) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/load/{inference_id}", self.base_url);
        let response = self
            .send_with_retry(|client| {
                client.put(&url).query(&[
                    ("cache_key", cache_key.to_string()),
                    ("lru_size", lru_size.to_string()),
                    ("ttl_seconds", ttl_seconds.to_string()),
                ])
            })
            .await?;
        Ok(response.json().await?)
    }

    pub async fn unload_model(
        &self,
        inference_id: &str,
        cache_key: &str,
    ) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/cache/{cache_key}/{inference_id}", self.base_url);
        let response = self.send_with_retry(|client| client.delete(&url)).await?;
        Ok(response.json().await?)
    }

    pub async fn clear_cache(&self, cache_key: &str) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/cache/{cache_key}", self.base_url);
        let response = self.send_with_retry(|client| client.delete(&url)).await?;
        Ok(response.json().await?)
    }

    pub async fn get_cached_models(&self) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/cache", self.base_url);
        let response = self.send_with_retry(|client| client.get(&url)).await?;
        Ok(response.json().await?)
    }

    pub async fn get_ttl_expiration(
        &self,
        cache_key: &str,
    ) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/cache/{cache_key}", self.base_url);
        let response = self.send_with_retry(|client| client.get(&url)).await?;
        Ok(response.json().await?)
    }

    pub async fn get_metadata(&self) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/metadata", self.base_url);
        let response = self.send_with_retry(|client| client.get(&url)).await?;
        Ok(response.json().await?)
    }
}
