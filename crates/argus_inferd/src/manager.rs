//! The model manager.
//!
//! Process-wide owner of every live model host. State is three maps mutated
//! together under one async mutex:
//!
//! - `handles`: inference id → host actor handle
//! - `lrus`: cache key → LRU of (inference id, expiry)
//! - `refs`: inference id → set of cache keys referencing it
//!
//! Invariant: a model has a live handle iff its reference set is non-empty,
//! i.e. iff it appears in at least one LRU. Any removal path (explicit
//! unload, LRU eviction, TTL expiry, cache clear) cascades through `refs`
//! and tears the host down when the last reference goes.

use crate::config::{ConfigRegistry, RegistrySnapshot};
use crate::error::InferdError;
use crate::host::{HostConfig, HostHandle};
use crate::plugin::build_plugin;
use argus_protocol::InferenceId;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Time source, pluggable so TTL tests can drive the clock manually.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

type Expiry = Option<DateTime<Utc>>;

struct ManagerState {
    handles: HashMap<InferenceId, HostHandle>,
    lrus: HashMap<String, LruCache<InferenceId, Expiry>>,
    refs: HashMap<InferenceId, HashSet<String>>,
    snapshot: RegistrySnapshot,
}

pub struct ModelManager {
    registry: ConfigRegistry,
    clock: Arc<dyn Clock>,
    state: Mutex<ManagerState>,
}

impl ModelManager {
    pub fn new(registry: ConfigRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            clock,
            state: Mutex::new(ManagerState {
                handles: HashMap::new(),
                lrus: HashMap::new(),
                refs: HashMap::new(),
                snapshot: RegistrySnapshot::default(),
            }),
        }
    }

    /// Current configuration snapshot, reloading if files changed.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, InferdError> {
        let mut state = self.state.lock().await;
        refresh_snapshot(&self.registry, &mut state)?;
        Ok(state.snapshot.clone())
    }

    /// Load (or refresh) a model under a cache key.
    ///
    /// The cache key's LRU is resized to `lru_size` on every call; a TTL of
    /// -1 (any negative) means no expiry for this entry. Returns the host
    /// handle.
    pub async fn load_model(
        &self,
        id: &InferenceId,
        cache_key: &str,
        lru_size: u32,
        ttl_seconds: i64,
    ) -> Result<HostHandle, InferdError> {
        let mut state = self.state.lock().await;
        refresh_snapshot(&self.registry, &mut state)?;

        // Record the reference and refresh recency/expiry.
        state
            .refs
            .entry(id.clone())
            .or_default()
            .insert(cache_key.to_string());
        let expires_at: Expiry = if ttl_seconds < 0 {
            None
        } else {
            Some(self.clock.now() + chrono::Duration::seconds(ttl_seconds))
        };
        state
            .lrus
            .entry(cache_key.to_string())
            .or_insert_with(LruCache::unbounded)
            .put(id.clone(), expires_at);

        // Resize before loading; the entry just added is MRU and survives
        // any size >= 1.
        resize_lru(&mut state, cache_key, lru_size.max(1) as usize).await;

        if let Some(handle) = state.handles.get(id) {
            return Ok(handle.clone());
        }

        // New model: build the plug-in from config and load it. A failure
        // rolls the cache entry back before propagating.
        let built = state.snapshot.model_config(id).map(|config| {
            let host_config = HostConfig::from_impl_args(&config.impl_args);
            build_plugin(&config.impl_class, &config.impl_args)
                .map(|plugin| HostHandle::spawn(id.clone(), plugin, host_config))
        });
        let handle = match built {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) | Err(e) => {
                error!("Failed to build model {id}: {e}");
                remove_from_lru(&mut state, cache_key, id).await;
                return Err(e);
            }
        };
        state.handles.insert(id.clone(), handle.clone());

        if let Err(e) = handle.load().await {
            error!("Failed to load model {id}: {e}");
            remove_from_lru(&mut state, cache_key, id).await;
            return Err(e);
        }
        info!("Loaded model {id} into cache '{cache_key}'");
        Ok(handle)
    }

    /// Explicitly remove a model from one cache.
    pub async fn unload_model(&self, cache_key: &str, id: &InferenceId) {
        let mut state = self.state.lock().await;
        debug!("{id} unload requested from cache '{cache_key}'");
        remove_from_lru(&mut state, cache_key, id).await;
    }

    /// Drop an entire cache; models only referenced by it are torn down.
    pub async fn clear_cache(&self, cache_key: &str) {
        let mut state = self.state.lock().await;
        debug!("Clearing cache '{cache_key}'");
        let Some(mut lru) = state.lrus.remove(cache_key) else {
            return;
        };
        while let Some((id, _)) = lru.pop_lru() {
            release_ref(&mut state, cache_key, &id).await;
        }
    }

    /// Expire TTL-bounded entries. Idempotent; scheduled every tick.
    pub async fn check_ttl_expired(&self) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let expired: Vec<(String, InferenceId)> = state
            .lrus
            .iter()
            .flat_map(|(key, lru)| {
                lru.iter()
                    .filter(|(_, expires)| matches!(expires, Some(t) if now > *t))
                    .map(|(id, _)| (key.clone(), id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (cache_key, id) in expired {
            debug!("{id} TTL expired in cache '{cache_key}'");
            remove_from_lru(&mut state, &cache_key, &id).await;
        }
    }

    /// Map of loaded models to the cache keys referencing them.
    pub async fn list_loaded_models(&self) -> BTreeMap<String, Vec<String>> {
        let state = self.state.lock().await;
        state
            .refs
            .iter()
            .map(|(id, keys)| {
                let mut keys: Vec<String> = keys.iter().cloned().collect();
                keys.sort();
                (id.to_string(), keys)
            })
            .collect()
    }

    /// Expiration times of every model in a cache.
    pub async fn get_ttl_expiration(&self, cache_key: &str) -> BTreeMap<String, Expiry> {
        let state = self.state.lock().await;
        state
            .lrus
            .get(cache_key)
            .map(|lru| {
                lru.iter()
                    .map(|(id, expires)| (id.to_string(), *expires))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a model currently has a live handle (for tests/introspection).
    pub async fn handle_exists(&self, id: &InferenceId) -> bool {
        self.state.lock().await.handles.contains_key(id)
    }
}

fn refresh_snapshot(
    registry: &ConfigRegistry,
    state: &mut ManagerState,
) -> Result<(), InferdError> {
    if let Some(snapshot) = registry.load_if_changed(&state.snapshot)? {
        state.snapshot = snapshot;
    }
    Ok(())
}

/// Pop LRU entries until the cache fits, cascading refs.
async fn resize_lru(state: &mut ManagerState, cache_key: &str, lru_size: usize) {
    loop {
        let Some(lru) = state.lrus.get_mut(cache_key) else {
            return;
        };
        if lru.len() <= lru_size {
            return;
        }
        let Some((evicted, _)) = lru.pop_lru() else {
            return;
        };
        debug!("{evicted} evicted from LRU cache '{cache_key}'");
        release_ref(state, cache_key, &evicted).await;
    }
}

/// Remove one (cache_key, id) entry and cascade.
async fn remove_from_lru(state: &mut ManagerState, cache_key: &str, id: &InferenceId) {
    let removed = state
        .lrus
        .get_mut(cache_key)
        .and_then(|lru| lru.pop(id))
        .is_some();
    if removed {
        release_ref(state, cache_key, id).await;
    }
    // Drop empty LRUs so introspection stays tidy.
    if state
        .lrus
        .get(cache_key)
        .map(|lru| lru.is_empty())
        .unwrap_or(false)
    {
        state.lrus.remove(cache_key);
    }
}

/// Drop a reference; tear the host down when the last one goes.
async fn release_ref(state: &mut ManagerState, cache_key: &str, id: &InferenceId) {
    let now_empty = match state.refs.get_mut(id) {
        Some(keys) => {
            keys.remove(cache_key);
            keys.is_empty()
        }
        None => false,
    };
    if now_empty {
        state.refs.remove(id);
        if let Some(handle) = state.handles.remove(id) {
            info!("Unloading model {id}");
            handle.shutdown().await;
        }
    }
}
