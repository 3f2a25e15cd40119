//! Inference service entrypoint: HTTP listener plus the TTL sweeper.

use crate::config::ConfigRegistry;
use crate::ingress::router;
use crate::manager::{ModelManager, SystemClock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How often expired TTL entries are swept.
pub const TTL_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Run the inference service until the process is stopped.
pub async fn serve(addr: SocketAddr, registry: ConfigRegistry) -> std::io::Result<()> {
    let manager = Arc::new(ModelManager::new(registry, Arc::new(SystemClock)));

    let sweeper = Arc::clone(&manager);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TTL_CHECK_INTERVAL);
        // First tick fires immediately; harmless, the check is idempotent.
        loop {
            interval.tick().await;
            sweeper.check_ttl_expired().await;
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Inference service listening on {addr}");
    axum::serve(listener, router(manager)).await
}
