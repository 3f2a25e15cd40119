//! HTTP client for the Argus inference service.
//!
//! [`InferenceClient`] talks to one endpoint with bounded retries.
//! [`DistributedClient`] fans a batch out over several endpoints by weight,
//! retries failed shards on the healthy ones, and reassembles outputs in the
//! original input order.

pub mod api;
pub mod distributed;
pub mod error;

pub use api::InferenceClient;
pub use distributed::DistributedClient;
pub use error::ClientError;
