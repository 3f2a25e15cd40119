//! Weighted fan-out over several inference servers.

use crate::api::InferenceClient;
use crate::error::ClientError;
use argus_protocol::{OutputValue, PredictionInput};
use std::collections::HashSet;
use tracing::{info, warn};

/// Client that transparently talks to one or many inference servers.
///
/// Weights are normalised to fractions; a server with twice the weight gets
/// roughly twice the batch.
pub struct DistributedClient {
    clients: Vec<InferenceClient>,
    weights: Vec<f64>,
}

impl DistributedClient {
    pub fn new(base_urls: Vec<String>, weights: Option<Vec<f64>>) -> Result<Self, ClientError> {
        Self::with_retries(base_urls, weights, 3)
    }

    pub fn with_retries(
        base_urls: Vec<String>,
        weights: Option<Vec<f64>>,
        retries: u32,
    ) -> Result<Self, ClientError> {
        if base_urls.is_empty() {
            return Err(ClientError::InvalidConfig(
                "at least one base URL is required".into(),
            ));
        }
        let weights = normalise_weights(weights, base_urls.len())?;
        let clients = base_urls
            .into_iter()
            .map(|url| InferenceClient::with_retries(url, retries))
            .collect();
        Ok(Self { clients, weights })
    }

    pub fn endpoint_count(&self) -> usize {
        self.clients.len()
    }

    /// Batch prediction across all endpoints.
    ///
    /// `output[i]` is always the result for `inputs[i]`, regardless of
    /// sharding and retries.
    pub async fn predict(
        &self,
        inference_id: &str,
        cache_key: &str,
        lru_size: u32,
        ttl_seconds: i64,
        inputs: Vec<PredictionInput>,
    ) -> Result<Vec<OutputValue>, ClientError> {
        if self.clients.len() == 1 {
            // Fast path, identical behaviour to the plain client.
            return self.clients[0]
                .predict(inference_id, cache_key, lru_size, ttl_seconds, &inputs)
                .await;
        }

        let total = inputs.len();
        let (shards, scatter_map) = shard_batch(inputs, &self.weights);

        // First pass: every non-empty shard on its own endpoint.
        let mut shard_outputs: Vec<Option<Vec<OutputValue>>> = vec![None; shards.len()];
        let mut failed: Vec<(usize, usize)> = Vec::new(); // (client_ix, shard_ix)

        let first_pass = shards.iter().enumerate().filter(|(_, s)| !s.is_empty());
        let results = futures_join(first_pass.map(|(ix, shard)| {
            let client = self.clients[ix].clone();
            let shard = shard.clone();
            let inference_id = inference_id.to_string();
            let cache_key = cache_key.to_string();
            async move {
                let result = client
                    .predict(&inference_id, &cache_key, lru_size, ttl_seconds, &shard)
                    .await;
                (ix, result)
            }
        }))
        .await;
        for (ix, result) in results {
            match result {
                Ok(outputs) => shard_outputs[ix] = Some(outputs),
                Err(e) => {
                    warn!(
                        "Predict sub-request failed on {}: {e}",
                        self.clients[ix].base_url()
                    );
                    failed.push((ix, ix));
                }
            }
        }

        // Second pass: retry failed shards round-robin on healthy endpoints.
        if !failed.is_empty() && failed.len() < shards.iter().filter(|s| !s.is_empty()).count() {
            let failed_clients: HashSet<usize> = failed.iter().map(|(c, _)| *c).collect();
            let healthy: Vec<&InferenceClient> = self
                .clients
                .iter()
                .enumerate()
                .filter(|(ix, _)| !failed_clients.contains(ix))
                .map(|(_, c)| c)
                .collect();
            if !healthy.is_empty() {
                info!(
                    "Retrying {} shards on {} healthy servers",
                    failed.len(),
                    healthy.len()
                );
                let retries = futures_join(failed.iter().enumerate().map(
                    |(retry_ix, (_, shard_ix))| {
                        let client = healthy[retry_ix % healthy.len()].clone();
                        let shard = shards[*shard_ix].clone();
                        let inference_id = inference_id.to_string();
                        let cache_key = cache_key.to_string();
                        let shard_ix = *shard_ix;
                        async move {
                            let result = client
                                .predict(&inference_id, &cache_key, lru_size, ttl_seconds, &shard)
                                .await;
                            (shard_ix, result)
                        }
                    },
                ))
                .await;
                for (shard_ix, result) in retries {
                    if let Ok(outputs) = result {
                        shard_outputs[shard_ix] = Some(outputs);
                        failed.retain(|(_, s)| *s != shard_ix);
                    }
                }
            }
        }

        if !failed.is_empty() {
            return Err(ClientError::ShardsFailed {
                failed: failed.len(),
            });
        }

        // Reassemble: flatten in shard order, then scatter to the original
        // positions.
        let mut ordered: Vec<Option<OutputValue>> = vec![None; total];
        let flat = shards
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_empty())
            .flat_map(|(ix, _)| shard_outputs[ix].take().expect("no shard failed").into_iter());
        for (src_pos, output) in scatter_map.into_iter().zip(flat) {
            ordered[src_pos] = Some(output);
        }
        Ok(ordered
            .into_iter()
            .map(|o| o.expect("dense scatter map"))
            .collect())
    }

    /// Fire on every endpoint; return the first success, error only if all
    /// fail.
    pub async fn load_model(
        &self,
        inference_id: &str,
        cache_key: &str,
        lru_size: u32,
        ttl_seconds: i64,
    ) -> Result<serde_json::Value, ClientError> {
        self.all_or_ignore("load_model", |client| {
            let inference_id = inference_id.to_string();
            let cache_key = cache_key.to_string();
            async move {
                client
                    .load_model(&inference_id, &cache_key, lru_size, ttl_seconds)
                    .await
            }
        })
        .await
    }

    pub async fn unload_model(
        &self,
        inference_id: &str,
        cache_key: &str,
    ) -> Result<serde_json::Value, ClientError> {
        self.all_or_ignore("unload_model", |client| {
            let inference_id = inference_id.to_string();
            let cache_key = cache_key.to_string();
            async move { client.unload_model(&inference_id, &cache_key).await }
        })
        .await
    }

    pub async fn clear_cache(&self, cache_key: &str) -> Result<serde_json::Value, ClientError> {
        self.all_or_ignore("clear_cache", |client| {
            let cache_key = cache_key.to_string();
            async move { client.clear_cache(&cache_key).await }
        })
        .await
    }

    /// Try endpoints in declared order; first success wins.
    pub async fn get_cached_models(&self) -> Result<serde_json::Value, ClientError> {
        self.first_alive("get_cached_models", |client| async move {
            client.get_cached_models().await
        })
        .await
    }

    pub async fn get_metadata(&self) -> Result<serde_json::Value, ClientError> {
        self.first_alive("get_metadata", |client| async move {
            client.get_metadata().await
        })
        .await
    }

    async fn all_or_ignore<F, Fut>(
        &self,
        operation: &str,
        call: F,
    ) -> Result<serde_json::Value, ClientError>
    where
        F: Fn(InferenceClient) -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value, ClientError>> + Send + 'static,
    {
        let results = futures_join(self.clients.iter().map(|client| {
            let url = client.base_url().to_string();
            let fut = call(client.clone());
            async move { (url, fut.await) }
        }))
        .await;

        let mut first_ok = None;
        for (url, result) in results {
            match result {
                Ok(value) => {
                    if first_ok.is_none() {
                        first_ok = Some(value);
                    }
                }
                Err(e) => warn!("{operation} failed on {url}: {e}"),
            }
        }
        first_ok.ok_or_else(|| ClientError::AllEndpointsFailed {
            operation: operation.to_string(),
        })
    }

    async fn first_alive<F, Fut>(
        &self,
        operation: &str,
        call: F,
    ) -> Result<serde_json::Value, ClientError>
    where
        F: Fn(InferenceClient) -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value, ClientError>>,
    {
        for client in &self.clients {
            match call(client.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    info!(
                        "{operation} failed on {}, trying next ({e})",
                        client.base_url()
                    );
                }
            }
        }
        Err(ClientError::AllEndpointsFailed {
            operation: operation.to_string(),
        })
    }
}

fn normalise_weights(weights: Option<Vec<f64>>, count: usize) -> Result<Vec<f64>, ClientError> {
    let weights = match weights {
        None => return Ok(vec![1.0 / count as f64; count]),
        Some(w) => w,
    };
    if weights.len() != count {
        return Err(ClientError::InvalidConfig(
            "weights must match number of URLs".into(),
        ));
    }
    if weights.iter().any(|w| *w <= 0.0) {
        return Err(ClientError::InvalidConfig(
            "weights must be positive".into(),
        ));
    }
    let total: f64 = weights.iter().sum();
    Ok(weights.into_iter().map(|w| w / total).collect())
}

/// Split a batch by normalised weights.
///
/// Shard sizes floor first; the remainder is distributed round-robin from
/// shard 0. The scatter map records, for each flattened shard position, the
/// original input index.
fn shard_batch(
    inputs: Vec<PredictionInput>,
    weights: &[f64],
) -> (Vec<Vec<PredictionInput>>, Vec<usize>) {
    let n = inputs.len();
    let mut shard_sizes: Vec<usize> = weights.iter().map(|w| (n as f64 * w) as usize).collect();
    let assigned: usize = shard_sizes.iter().sum();
    let num_shards = shard_sizes.len();
    for i in 0..(n - assigned) {
        shard_sizes[i % num_shards] += 1;
    }

    let mut shards = Vec::with_capacity(shard_sizes.len());
    let mut scatter_map = Vec::with_capacity(n);
    let mut inputs = inputs.into_iter();
    let mut cursor = 0usize;
    for size in shard_sizes {
        let mut shard = Vec::with_capacity(size);
        for _ in 0..size {
            shard.push(inputs.next().expect("sizes sum to n"));
            scatter_map.push(cursor);
            cursor += 1;
        }
        shards.push(shard);
    }
    (shards, scatter_map)
}

/// Await a set of futures concurrently, collecting their outputs.
async fn futures_join<T, Fut>(futures: impl IntoIterator<Item = Fut>) -> Vec<T>
where
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut set = tokio::task::JoinSet::new();
    for fut in futures {
        set.spawn(fut);
    }
    let mut out = Vec::new();
    while let Some(result) = set.join_next().await {
        if let Ok(value) = result {
            out.push(value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(n: usize) -> Vec<PredictionInput> {
        (0..n)
            .map(|i| PredictionInput::from_data(serde_json::json!(i)))
            .collect()
    }

    #[test]
    fn shard_sizes_follow_weights() {
        let weights = normalise_weights(Some(vec![2.0, 1.0]), 2).unwrap();
        let (shards, scatter_map) = shard_batch(inputs(9), &weights);
        assert_eq!(shards[0].len(), 6);
        assert_eq!(shards[1].len(), 3);
        assert_eq!(scatter_map, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn remainder_distributes_round_robin() {
        let weights = normalise_weights(None, 3).unwrap();
        let (shards, _) = shard_batch(inputs(10), &weights);
        let sizes: Vec<usize> = shards.iter().map(|s| s.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        // floor gives 3+3+3, remainder lands on shard 0.
        assert_eq!(sizes, vec![4, 3, 3]);
    }

    #[test]
    fn every_shard_size_is_floor_or_ceil() {
        for n in [0usize, 1, 5, 17, 100] {
            let weights = normalise_weights(Some(vec![5.0, 2.0, 3.0]), 3).unwrap();
            let (shards, scatter_map) = shard_batch(inputs(n), &weights);
            let total: usize = shards.iter().map(|s| s.len()).sum();
            assert_eq!(total, n);
            assert_eq!(scatter_map.len(), n);
            for (shard, weight) in shards.iter().zip(&weights) {
                let exact = n as f64 * weight;
                assert!(
                    shard.len() >= exact.floor() as usize
                        && shard.len() <= exact.ceil() as usize + 1
                );
            }
        }
    }

    #[test]
    fn invalid_weights_are_rejected() {
        assert!(normalise_weights(Some(vec![1.0]), 2).is_err());
        assert!(normalise_weights(Some(vec![1.0, 0.0]), 2).is_err());
        assert!(normalise_weights(Some(vec![1.0, -2.0]), 2).is_err());
    }

    #[test]
    fn empty_url_list_is_rejected() {
        assert!(DistributedClient::new(vec![], None).is_err());
    }
}
