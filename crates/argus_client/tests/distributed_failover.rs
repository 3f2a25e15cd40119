//! Fan-out against live inference servers, including dead-endpoint
//! fail-over.

use argus_client::{DistributedClient, InferenceClient};
use argus_inferd::config::ConfigRegistry;
use argus_inferd::ingress::router;
use argus_inferd::manager::{ModelManager, SystemClock};
use argus_protocol::{OutputValue, PredictionInput};
use std::io::Write;
use std::sync::Arc;

async fn spawn_server(dir: &std::path::Path) -> String {
    let mut f = std::fs::File::create(dir.join("00_models.toml")).unwrap();
    f.write_all(
        br#"
[groups.g]
config = { impl_class = "echo", batch_wait_timeout_s = 0.001 }

[groups.g.inference_ids.echo]
"#,
    )
    .unwrap();
    let registry = ConfigRegistry::new(dir.to_path_buf(), None);
    let manager = Arc::new(ModelManager::new(registry, Arc::new(SystemClock)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(manager)).await.unwrap();
    });
    format!("http://{addr}")
}

/// An address nothing listens on.
fn dead_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn text_inputs(n: usize) -> Vec<PredictionInput> {
    (0..n)
        .map(|i| PredictionInput::from_data(serde_json::json!(format!("in{i}"))))
        .collect()
}

fn expect_texts(outputs: &[OutputValue], n: usize) {
    assert_eq!(outputs.len(), n);
    for (i, output) in outputs.iter().enumerate() {
        assert_eq!(
            output.as_json().unwrap().as_str().unwrap(),
            format!("Echo: in{i}")
        );
    }
}

#[tokio::test]
async fn single_server_predict_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let url = spawn_server(dir.path()).await;
    let client = InferenceClient::with_retries(&url, 0);

    let outputs = client
        .predict("g/echo", "c", 1, 60, &text_inputs(2))
        .await
        .unwrap();
    expect_texts(&outputs, 2);

    let cached = client.get_cached_models().await.unwrap();
    assert_eq!(cached["cache"]["g/echo"], serde_json::json!(["c"]));
}

#[tokio::test]
async fn weighted_shards_reassemble_in_input_order() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();
    let urls = vec![spawn_server(dir1.path()).await, spawn_server(dir2.path()).await];
    let client = DistributedClient::with_retries(urls, Some(vec![2.0, 1.0]), 0).unwrap();

    let outputs = client
        .predict("g/echo", "c", 1, 60, text_inputs(9))
        .await
        .unwrap();
    expect_texts(&outputs, 9);
}

#[tokio::test]
async fn dead_endpoint_shard_retries_on_healthy_server() {
    let dir = tempfile::tempdir().unwrap();
    let urls = vec![spawn_server(dir.path()).await, dead_endpoint()];
    let client = DistributedClient::with_retries(urls, Some(vec![2.0, 1.0]), 0).unwrap();

    let outputs = client
        .predict("g/echo", "c", 1, 60, text_inputs(9))
        .await
        .unwrap();
    expect_texts(&outputs, 9);
}

#[tokio::test]
async fn all_endpoints_dead_fails_the_batch() {
    let client =
        DistributedClient::with_retries(vec![dead_endpoint(), dead_endpoint()], None, 0).unwrap();
    assert!(client
        .predict("g/echo", "c", 1, 60, text_inputs(4))
        .await
        .is_err());
}

#[tokio::test]
async fn load_unload_round_trip_updates_cache_listing() {
    let dir = tempfile::tempdir().unwrap();
    let url = spawn_server(dir.path()).await;
    let client = InferenceClient::with_retries(&url, 0);

    let response = client.load_model("g/echo", "k", 1, -1).await.unwrap();
    assert_eq!(response["status"], "loaded");

    let expirations = client.get_ttl_expiration("k").await.unwrap();
    assert!(expirations["expirations"]
        .as_object()
        .unwrap()
        .contains_key("g/echo"));

    let response = client.unload_model("g/echo", "k").await.unwrap();
    assert_eq!(response["status"], "unloaded");

    let cached = client.get_cached_models().await.unwrap();
    assert!(cached["cache"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn all_or_ignore_returns_first_success() {
    let dir = tempfile::tempdir().unwrap();
    let urls = vec![dead_endpoint(), spawn_server(dir.path()).await];
    let client = DistributedClient::with_retries(urls, None, 0).unwrap();

    let response = client.load_model("g/echo", "k", 1, -1).await.unwrap();
    assert_eq!(response["status"], "loaded");

    let metadata = client.get_metadata().await.unwrap();
    assert!(metadata["g"]["inference_ids"]
        .as_object()
        .unwrap()
        .contains_key("echo"));
}
