//! Work discovery rows and input handlers.

use anyhow::{bail, Context, Result};
use argus_protocol::{ModelMetadata, PredictionInput};
use argus_pql::SearchResult;

/// One unit of work pulled from the index.
#[derive(Debug, Clone)]
pub struct JobInputData {
    pub sha256: String,
    pub path: String,
    pub last_modified: String,
    pub mime_type: String,
    pub file_id: i64,
    pub item_id: i64,
    /// Set for text-entity discovery rows.
    pub data_id: Option<i64>,
    pub text: Option<String>,
}

impl From<SearchResult> for JobInputData {
    fn from(result: SearchResult) -> Self {
        Self {
            sha256: result.sha256,
            path: result.path,
            last_modified: result.last_modified,
            mime_type: result.mime_type,
            file_id: result.file_id,
            item_id: result.item_id,
            data_id: result.data_id,
            text: result.text,
        }
    }
}

impl JobInputData {
    /// Stable key for the failed-items set: text rows by data id, items by
    /// content hash, so retry gating survives across batches.
    pub fn failure_key(&self) -> String {
        match self.data_id {
            Some(data_id) => data_id.to_string(),
            None => self.sha256.clone(),
        }
    }
}

/// Input handler: maps a discovery row to zero or more prediction inputs.
pub type InputTransform<'a> = dyn FnMut(&JobInputData) -> Result<Vec<PredictionInput>> + 'a;

/// Build the input handler named by the model's metadata.
pub fn make_input_transform(
    model: &ModelMetadata,
    threshold: Option<f64>,
) -> Result<Box<InputTransform<'static>>> {
    let opts = make_data_opts(model, threshold);
    match model.input_handler.as_str() {
        "file_bytes" => Ok(Box::new(move |item: &JobInputData| {
            let bytes = std::fs::read(&item.path)
                .with_context(|| format!("failed to read {}", item.path))?;
            Ok(vec![PredictionInput {
                data: opts.clone(),
                file: Some(bytes),
            }])
        })),
        "text_content" => Ok(Box::new(move |item: &JobInputData| {
            let text = item
                .text
                .as_deref()
                .context("text handler on a row without text")?;
            let mut data = serde_json::Map::new();
            data.insert("text".to_string(), serde_json::Value::String(text.to_string()));
            if let Some(serde_json::Value::Object(opts)) = &opts {
                data.extend(opts.clone());
            }
            Ok(vec![PredictionInput::from_data(serde_json::Value::Object(
                data,
            ))])
        })),
        other => bail!("unknown input handler: {other}"),
    }
}

fn make_data_opts(model: &ModelMetadata, threshold: Option<f64>) -> Option<serde_json::Value> {
    let mut opts = model.input_handler_opts.clone();
    if let Some(threshold) = threshold {
        opts.insert(
            "threshold".to_string(),
            serde_json::Value::from(threshold),
        );
    }
    if opts.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(opts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(handler: &str) -> ModelMetadata {
        serde_json::from_value(serde_json::json!({
            "group": "g",
            "inference_id": "m",
            "input_handler": handler,
            "output_type": "text",
        }))
        .unwrap()
    }

    fn item(path: &str, text: Option<&str>) -> JobInputData {
        JobInputData {
            sha256: "abc".into(),
            path: path.into(),
            last_modified: "t".into(),
            mime_type: "image/png".into(),
            file_id: 1,
            item_id: 1,
            data_id: None,
            text: text.map(String::from),
        }
    }

    #[test]
    fn file_handler_reads_bytes_and_carries_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"pixels").unwrap();

        let mut transform = make_input_transform(&model("file_bytes"), Some(0.4)).unwrap();
        let units = transform(&item(path.to_str().unwrap(), None)).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].file.as_deref(), Some(b"pixels".as_slice()));
        assert_eq!(units[0].data.as_ref().unwrap()["threshold"], 0.4);
    }

    #[test]
    fn missing_file_fails_the_item() {
        let mut transform = make_input_transform(&model("file_bytes"), None).unwrap();
        assert!(transform(&item("/definitely/not/here", None)).is_err());
    }

    #[test]
    fn text_handler_wraps_row_text() {
        let mut transform = make_input_transform(&model("text_content"), None).unwrap();
        let units = transform(&item("/x", Some("hello"))).unwrap();
        assert_eq!(units[0].data.as_ref().unwrap()["text"], "hello");
    }

    #[test]
    fn failure_key_prefers_data_id() {
        let mut row = item("/x", None);
        assert_eq!(row.failure_key(), "abc");
        row.data_id = Some(42);
        assert_eq!(row.failure_key(), "42");
    }
}
