//! Caller-visible model metadata.
//!
//! This is the subset of the inference configuration that the index side
//! needs to plan an extraction job: what the model reads, what it emits, and
//! its default batching parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of data a model writes back into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputDataType {
    Tags,
    Text,
    Clip,
    TextEmbedding,
}

impl OutputDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputDataType::Tags => "tags",
            OutputDataType::Text => "text",
            OutputDataType::Clip => "clip",
            OutputDataType::TextEmbedding => "text-embedding",
        }
    }
}

impl fmt::Display for OutputDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutputDataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tags" => Ok(OutputDataType::Tags),
            "text" => Ok(OutputDataType::Text),
            "clip" => Ok(OutputDataType::Clip),
            "text-embedding" => Ok(OutputDataType::TextEmbedding),
            _ => Err(format!("unknown output data type: '{s}'")),
        }
    }
}

/// Level of the index a model consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetEntity {
    /// Source files/items (images, videos, documents).
    Items,
    /// Previously extracted text rows.
    Text,
    /// Previously extracted tag rows.
    Tags,
}

/// Metadata for one inference id, as served by `GET /metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub group: String,
    pub inference_id: String,
    /// Name of the input handler that turns an index row into work units.
    pub input_handler: String,
    #[serde(default)]
    pub input_handler_opts: serde_json::Map<String, serde_json::Value>,
    pub output_type: OutputDataType,
    #[serde(default = "default_batch_size")]
    pub default_batch_size: u32,
    #[serde(default)]
    pub default_threshold: Option<f64>,
    /// Mime type prefixes this model accepts (empty = all).
    #[serde(default)]
    pub input_mime_types: Vec<String>,
    #[serde(default = "default_target_entities")]
    pub target_entities: Vec<TargetEntity>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    /// Distance function for embedding outputs ("l2" or "cosine").
    #[serde(default)]
    pub distance_func: Option<String>,
    /// When false, items already processed by this setter stay eligible.
    #[serde(default = "default_true")]
    pub skip_processed: bool,
}

fn default_batch_size() -> u32 {
    64
}

fn default_target_entities() -> Vec<TargetEntity> {
    vec![TargetEntity::Items]
}

fn default_true() -> bool {
    true
}

impl ModelMetadata {
    /// Full setter name, equal to the inference id string.
    pub fn setter_name(&self) -> String {
        format!("{}/{}", self.group, self.inference_id)
    }

    pub fn targets_items(&self) -> bool {
        self.target_entities == [TargetEntity::Items]
    }

    pub fn targets_text(&self) -> bool {
        self.target_entities == [TargetEntity::Text]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_defaults_apply() {
        let meta: ModelMetadata = serde_json::from_value(serde_json::json!({
            "group": "ocr",
            "inference_id": "doctr",
            "input_handler": "file_bytes",
            "output_type": "text",
        }))
        .unwrap();
        assert_eq!(meta.default_batch_size, 64);
        assert!(meta.targets_items());
        assert!(meta.skip_processed);
        assert_eq!(meta.setter_name(), "ocr/doctr");
    }

    #[test]
    fn output_type_round_trips_kebab_case() {
        let t: OutputDataType = "text-embedding".parse().unwrap();
        assert_eq!(t, OutputDataType::TextEmbedding);
        assert_eq!(
            serde_json::to_value(t).unwrap(),
            serde_json::Value::String("text-embedding".into())
        );
    }
}
