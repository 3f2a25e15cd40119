//! Inference service errors.

use argus_protocol::InferenceId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferdError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("duplicate inference id '{0}' (allow_override not set)")]
    DuplicateInferenceId(String),

    #[error("model config for '{0}' is missing impl_class")]
    MissingImplClass(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("unknown inference id: {0}")]
    UnknownInferenceId(InferenceId),

    #[error("unknown impl_class: {0}")]
    UnknownImplClass(String),

    #[error("model load failed for {0}: {1}")]
    LoadFailed(InferenceId, String),

    #[error("prediction failed: {0}")]
    PredictFailed(String),

    #[error("model host is gone: {0}")]
    HostGone(InferenceId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
