//! Per-model host actor.
//!
//! One tokio task owns the plug-in instance and serializes every operation
//! on it. Concurrent predict calls that arrive within the batch window are
//! fused into a single `predict` invocation and split back per caller in
//! request order.

use crate::error::InferdError;
use crate::plugin::InferencePlugin;
use argus_protocol::{InferenceId, OutputValue, PredictionInput};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info};

const DEFAULT_MAX_BATCH_SIZE: usize = 64;
const DEFAULT_BATCH_WAIT_S: f64 = 0.01;

/// Batching parameters, read from the model's `impl_args`.
#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    pub max_batch_size: usize,
    pub batch_wait: Duration,
}

impl HostConfig {
    pub fn from_impl_args(args: &toml::Table) -> Self {
        let max_batch_size = args
            .get("max_batch_size")
            .and_then(|v| v.as_integer())
            .map(|v| v.max(1) as usize)
            .unwrap_or(DEFAULT_MAX_BATCH_SIZE);
        let batch_wait = args
            .get("batch_wait_timeout_s")
            .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_BATCH_WAIT_S));
        Self {
            max_batch_size,
            batch_wait,
        }
    }
}

enum HostMsg {
    Predict {
        inputs: Vec<PredictionInput>,
        reply: oneshot::Sender<Result<Vec<OutputValue>, String>>,
    },
    Load {
        reply: oneshot::Sender<Result<(), String>>,
    },
    Keepalive {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running host actor. Cloneable; the actor lives until it is
/// shut down or the last handle drops.
#[derive(Clone)]
pub struct HostHandle {
    id: InferenceId,
    tx: mpsc::UnboundedSender<HostMsg>,
}

impl HostHandle {
    /// Spawn the actor for a plug-in instance.
    pub fn spawn(id: InferenceId, plugin: Box<dyn InferencePlugin>, config: HostConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor_id = id.clone();
        tokio::spawn(run_actor(actor_id, plugin, config, rx));
        Self { id, tx }
    }

    pub fn id(&self) -> &InferenceId {
        &self.id
    }

    /// Batched prediction. Resolves with this caller's outputs, in the
    /// caller's input order.
    pub async fn predict(
        &self,
        inputs: Vec<PredictionInput>,
    ) -> Result<Vec<OutputValue>, InferdError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostMsg::Predict { inputs, reply })
            .map_err(|_| InferdError::HostGone(self.id.clone()))?;
        rx.await
            .map_err(|_| InferdError::HostGone(self.id.clone()))?
            .map_err(InferdError::PredictFailed)
    }

    /// Acquire model resources. Serialized inside the actor, so concurrent
    /// loads wait on a single attempt.
    pub async fn load(&self) -> Result<(), InferdError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostMsg::Load { reply })
            .map_err(|_| InferdError::HostGone(self.id.clone()))?;
        rx.await
            .map_err(|_| InferdError::HostGone(self.id.clone()))?
            .map_err(|e| InferdError::LoadFailed(self.id.clone(), e))
    }

    /// Liveness probe.
    pub async fn keepalive(&self) -> Result<(), InferdError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostMsg::Keepalive { reply })
            .map_err(|_| InferdError::HostGone(self.id.clone()))?;
        rx.await.map_err(|_| InferdError::HostGone(self.id.clone()))
    }

    /// Unload the model and stop the actor. Resolves once resources are
    /// released.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HostMsg::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct PendingCall {
    count: usize,
    reply: oneshot::Sender<Result<Vec<OutputValue>, String>>,
}

async fn run_actor(
    id: InferenceId,
    mut plugin: Box<dyn InferencePlugin>,
    config: HostConfig,
    mut rx: mpsc::UnboundedReceiver<HostMsg>,
) {
    let mut loaded = false;
    info!("Host actor started for {id}");

    while let Some(msg) = rx.recv().await {
        match msg {
            HostMsg::Load { reply } => {
                let result = ensure_loaded(&id, plugin.as_mut(), &mut loaded);
                let _ = reply.send(result);
            }
            HostMsg::Keepalive { reply } => {
                let _ = reply.send(());
            }
            HostMsg::Shutdown { reply } => {
                plugin.unload();
                info!("Host actor stopped for {id}");
                let _ = reply.send(());
                return;
            }
            HostMsg::Predict { inputs, reply } => {
                let mut batch: Vec<PredictionInput> = inputs;
                let mut calls = vec![PendingCall {
                    count: batch.len(),
                    reply,
                }];

                // Fuse further predict calls until the batch is full or the
                // window closes.
                let deadline = Instant::now() + config.batch_wait;
                let mut shutdown: Option<oneshot::Sender<()>> = None;
                while batch.len() < config.max_batch_size {
                    let msg = match tokio::time::timeout_at(deadline, rx.recv()).await {
                        Ok(Some(msg)) => msg,
                        Ok(None) | Err(_) => break,
                    };
                    match msg {
                        HostMsg::Predict { inputs, reply } => {
                            calls.push(PendingCall {
                                count: inputs.len(),
                                reply,
                            });
                            batch.extend(inputs);
                        }
                        HostMsg::Load { reply } => {
                            let result = ensure_loaded(&id, plugin.as_mut(), &mut loaded);
                            let _ = reply.send(result);
                        }
                        HostMsg::Keepalive { reply } => {
                            let _ = reply.send(());
                        }
                        HostMsg::Shutdown { reply } => {
                            // Serve the fused batch first, then stop.
                            shutdown = Some(reply);
                            break;
                        }
                    }
                }

                debug!(
                    "Fused batch of {} inputs across {} calls for {id}",
                    batch.len(),
                    calls.len()
                );
                dispatch_batch(&id, plugin.as_mut(), &mut loaded, batch, calls);

                if let Some(reply) = shutdown {
                    plugin.unload();
                    info!("Host actor stopped for {id}");
                    let _ = reply.send(());
                    return;
                }
            }
        }
    }

    // All handles dropped without an explicit shutdown.
    plugin.unload();
    info!("Host actor dropped for {id}");
}

fn ensure_loaded(
    id: &InferenceId,
    plugin: &mut dyn InferencePlugin,
    loaded: &mut bool,
) -> Result<(), String> {
    if *loaded {
        return Ok(());
    }
    match plugin.load() {
        Ok(()) => {
            *loaded = true;
            Ok(())
        }
        Err(e) => {
            error!("Load failed for {id}: {e}");
            Err(e.to_string())
        }
    }
}

fn dispatch_batch(
    id: &InferenceId,
    plugin: &mut dyn InferencePlugin,
    loaded: &mut bool,
    batch: Vec<PredictionInput>,
    calls: Vec<PendingCall>,
) {
    if let Err(e) = ensure_loaded(id, plugin, loaded) {
        for call in calls {
            let _ = call.reply.send(Err(e.clone()));
        }
        return;
    }

    match plugin.predict(&batch) {
        Ok(outputs) if outputs.len() == batch.len() => {
            let mut outputs = outputs.into_iter();
            for call in calls {
                let slice: Vec<OutputValue> = outputs.by_ref().take(call.count).collect();
                let _ = call.reply.send(Ok(slice));
            }
        }
        Ok(outputs) => {
            // Shape violation fails the whole fused batch.
            let msg = format!(
                "model returned {} outputs for {} inputs",
                outputs.len(),
                batch.len()
            );
            error!("{id}: {msg}");
            for call in calls {
                let _ = call.reply.send(Err(msg.clone()));
            }
        }
        Err(e) => {
            error!("Prediction failed for {id}: {e}");
            let msg = e.to_string();
            for call in calls {
                let _ = call.reply.send(Err(msg.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Records the size of each predict call it receives.
    struct RecordingPlugin {
        batch_sizes: Arc<std::sync::Mutex<Vec<usize>>>,
        load_attempts: Arc<AtomicUsize>,
        fail_loads: usize,
    }

    impl InferencePlugin for RecordingPlugin {
        fn name(&self) -> &str {
            "recording"
        }

        fn load(&mut self) -> Result<(), InferdError> {
            let attempt = self.load_attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_loads {
                return Err(InferdError::PredictFailed("weights missing".to_string()));
            }
            Ok(())
        }

        fn predict(
            &mut self,
            inputs: &[PredictionInput],
        ) -> Result<Vec<OutputValue>, InferdError> {
            self.batch_sizes.lock().unwrap().push(inputs.len());
            Ok(inputs
                .iter()
                .map(|i| {
                    OutputValue::text(
                        i.data
                            .as_ref()
                            .and_then(|d| d.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    )
                })
                .collect())
        }

        fn unload(&mut self) {}
    }

    fn spawn_recording(
        max_batch_size: usize,
        fail_loads: usize,
    ) -> (HostHandle, Arc<std::sync::Mutex<Vec<usize>>>, Arc<AtomicUsize>) {
        let batch_sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let load_attempts = Arc::new(AtomicUsize::new(0));
        let plugin = RecordingPlugin {
            batch_sizes: Arc::clone(&batch_sizes),
            load_attempts: Arc::clone(&load_attempts),
            fail_loads,
        };
        let handle = HostHandle::spawn(
            InferenceId::new("test", "recording"),
            Box::new(plugin),
            HostConfig {
                max_batch_size,
                batch_wait: Duration::from_millis(50),
            },
        );
        (handle, batch_sizes, load_attempts)
    }

    fn input(text: &str) -> PredictionInput {
        PredictionInput::from_data(serde_json::json!(text))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_fuse_and_split_in_order() {
        let (handle, batch_sizes, _) = spawn_recording(16, 0);
        handle.load().await.unwrap();

        let h1 = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.predict(vec![input("a"), input("b")]).await })
        };
        let h2 = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.predict(vec![input("c")]).await })
        };

        let out1 = h1.await.unwrap().unwrap();
        let out2 = h2.await.unwrap().unwrap();
        assert_eq!(out1, vec![OutputValue::text("a"), OutputValue::text("b")]);
        assert_eq!(out2, vec![OutputValue::text("c")]);

        // Both calls landed in one fused invocation.
        assert_eq!(batch_sizes.lock().unwrap().as_slice(), &[3]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_dispatches_without_waiting() {
        let (handle, batch_sizes, _) = spawn_recording(2, 0);
        handle.load().await.unwrap();

        handle.predict(vec![input("a"), input("b")]).await.unwrap();
        assert_eq!(batch_sizes.lock().unwrap().as_slice(), &[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_load_propagates_and_retries() {
        let (handle, _, attempts) = spawn_recording(4, 1);

        assert!(handle.load().await.is_err());
        handle.load().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn predict_loads_lazily() {
        let (handle, _, attempts) = spawn_recording(4, 0);
        handle.predict(vec![input("a")]).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_unloads_and_stops() {
        let (handle, _, _) = spawn_recording(4, 0);
        handle.load().await.unwrap();
        handle.shutdown().await;
        assert!(matches!(
            handle.keepalive().await,
            Err(InferdError::HostGone(_))
        ));
    }
}
