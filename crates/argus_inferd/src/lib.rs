//! The Argus inference service.
//!
//! Hosts model plug-ins behind an HTTP boundary. Each loaded model runs as a
//! host actor that fuses concurrent predict calls into batches; the model
//! manager keeps per-cache-key LRUs with TTL expiry and reference-counted
//! teardown.

pub mod config;
pub mod error;
pub mod host;
pub mod ingress;
pub mod manager;
pub mod plugin;
pub mod server;

pub use config::{ConfigRegistry, RegistrySnapshot};
pub use error::InferdError;
pub use host::HostHandle;
pub use manager::{Clock, ModelManager, SystemClock};
pub use plugin::{plugin_factories, InferencePlugin};
pub use server::serve;
