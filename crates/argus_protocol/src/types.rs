//! Core identifier and value types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Canonical model identifier: `group/name`.
///
/// Every API operation addresses a model by this id. The group is the
/// configuration group the model was declared in; the name is unique within
/// the group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct InferenceId(String);

impl InferenceId {
    pub fn new(group: &str, name: &str) -> Self {
        Self(format!("{group}/{name}"))
    }

    pub fn group(&self) -> &str {
        // Constructor guarantees the separator is present.
        self.0.split_once('/').map(|(g, _)| g).unwrap_or(&self.0)
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InferenceId {
    type Err = InferenceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((group, name)) if !group.is_empty() && !name.is_empty() => {
                Ok(Self(format!("{group}/{name}")))
            }
            _ => Err(InferenceIdError::Malformed(s.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferenceIdError {
    #[error("inference id must be of the form group/name, got '{0}'")]
    Malformed(String),
}

/// One element of a prediction batch.
///
/// Either side may be absent: text-only models take `data`, pure file models
/// take `file`, and some take both (the structured side then carries
/// inference-time options).
#[derive(Debug, Clone, Default)]
pub struct PredictionInput {
    pub data: Option<serde_json::Value>,
    pub file: Option<Vec<u8>>,
}

impl PredictionInput {
    pub fn from_data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            file: None,
        }
    }

    pub fn from_file(file: Vec<u8>) -> Self {
        Self {
            data: None,
            file: Some(file),
        }
    }
}

/// One element of a prediction output batch.
///
/// Strings, maps and lists ride in `Json`; embeddings and other opaque
/// payloads ride in `Binary`.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl OutputValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Json(serde_json::Value::String(s.into()))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(b) => Some(b),
            Self::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            Self::Binary(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_id_round_trip() {
        let id: InferenceId = "clip/ViT-L-14".parse().unwrap();
        assert_eq!(id.group(), "clip");
        assert_eq!(id.name(), "ViT-L-14");
        assert_eq!(id.to_string(), "clip/ViT-L-14");
    }

    #[test]
    fn inference_id_keeps_extra_slashes_in_name() {
        let id: InferenceId = "st/sentence-transformers/all-MiniLM-L6-v2".parse().unwrap();
        assert_eq!(id.group(), "st");
        assert_eq!(id.name(), "sentence-transformers/all-MiniLM-L6-v2");
    }

    #[test]
    fn inference_id_rejects_missing_group() {
        assert!("noslash".parse::<InferenceId>().is_err());
        assert!("/name".parse::<InferenceId>().is_err());
        assert!("group/".parse::<InferenceId>().is_err());
    }
}
