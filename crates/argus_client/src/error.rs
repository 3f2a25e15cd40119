//! Client errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response decode error: {0}")]
    Wire(#[from] argus_protocol::WireError),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("{failed} predict sub-requests failed; aborting batch")]
    ShardsFailed { failed: usize },

    #[error("all servers failed {operation}")]
    AllEndpointsFailed { operation: String },
}

impl ClientError {
    /// Whether a retry against the same endpoint could help.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Status { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            ClientError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
