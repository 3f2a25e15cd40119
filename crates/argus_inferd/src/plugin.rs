//! Model plug-in capability set.
//!
//! A plug-in exposes exactly `name`/`load`/`predict`/`unload`. Real model
//! implementations (taggers, OCR, embedders) ship separately and register a
//! factory here; the built-ins below are small enough to live in-tree and
//! exercise every code path, binary and structured.

use crate::error::InferdError;
use argus_protocol::{OutputValue, PredictionInput};
use std::collections::HashMap;

/// The capability set every model implementation satisfies.
///
/// `load` and `unload` are idempotent. `predict` returns one output per
/// input in the same order, or an error failing the whole batch.
pub trait InferencePlugin: Send {
    fn name(&self) -> &str;
    fn load(&mut self) -> Result<(), InferdError>;
    fn predict(&mut self, inputs: &[PredictionInput]) -> Result<Vec<OutputValue>, InferdError>;
    fn unload(&mut self);
}

/// Constructor taking the resolved `impl_args`.
pub type PluginFactory = fn(&toml::Table) -> Box<dyn InferencePlugin>;

/// The capability-object table, built once at startup.
pub fn plugin_factories() -> HashMap<&'static str, PluginFactory> {
    let mut table: HashMap<&'static str, PluginFactory> = HashMap::new();
    table.insert("echo", |args| Box::new(EchoModel::new(args)));
    table.insert("digest", |_| Box::new(DigestModel::default()));
    table
}

/// Instantiate a plug-in by its `impl_class`.
pub fn build_plugin(
    impl_class: &str,
    impl_args: &toml::Table,
) -> Result<Box<dyn InferencePlugin>, InferdError> {
    plugin_factories()
        .get(impl_class)
        .map(|factory| factory(impl_args))
        .ok_or_else(|| InferdError::UnknownImplClass(impl_class.to_string()))
}

/// Echoes its inputs back with a prefix. String inputs are echoed directly;
/// object inputs echo their `text` field.
pub struct EchoModel {
    prefix: String,
    loaded: bool,
}

impl EchoModel {
    fn new(args: &toml::Table) -> Self {
        let prefix = args
            .get("prefix")
            .and_then(|v| v.as_str())
            .unwrap_or("Echo: ")
            .to_string();
        Self {
            prefix,
            loaded: false,
        }
    }
}

impl InferencePlugin for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    fn load(&mut self) -> Result<(), InferdError> {
        self.loaded = true;
        Ok(())
    }

    fn predict(&mut self, inputs: &[PredictionInput]) -> Result<Vec<OutputValue>, InferdError> {
        if !self.loaded {
            return Err(InferdError::PredictFailed("model not loaded".to_string()));
        }
        inputs
            .iter()
            .map(|input| {
                let text = match &input.data {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(serde_json::Value::Object(map)) => map
                        .get("text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Ok(OutputValue::text(format!("{}{text}", self.prefix)))
            })
            .collect()
    }

    fn unload(&mut self) {
        self.loaded = false;
    }
}

/// Hashes each input file, returning the digest as a binary output.
#[derive(Default)]
pub struct DigestModel {
    loaded: bool,
}

impl InferencePlugin for DigestModel {
    fn name(&self) -> &str {
        "digest"
    }

    fn load(&mut self) -> Result<(), InferdError> {
        self.loaded = true;
        Ok(())
    }

    fn predict(&mut self, inputs: &[PredictionInput]) -> Result<Vec<OutputValue>, InferdError> {
        inputs
            .iter()
            .map(|input| {
                let file = input.file.as_deref().ok_or_else(|| {
                    InferdError::PredictFailed("digest requires a file input".to_string())
                })?;
                let hash = blake3::hash(file);
                Ok(OutputValue::Binary(hash.as_bytes().to_vec()))
            })
            .collect()
    }

    fn unload(&mut self) {
        self.loaded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_prefixes_string_inputs() {
        let mut model = EchoModel::new(&toml::Table::new());
        model.load().unwrap();
        let outputs = model
            .predict(&[
                PredictionInput::from_data(serde_json::json!("a")),
                PredictionInput::from_data(serde_json::json!({"text": "b"})),
            ])
            .unwrap();
        assert_eq!(outputs[0], OutputValue::text("Echo: a"));
        assert_eq!(outputs[1], OutputValue::text("Echo: b"));
    }

    #[test]
    fn digest_fails_items_without_files() {
        let mut model = DigestModel::default();
        model.load().unwrap();
        assert!(model
            .predict(&[PredictionInput::from_data(serde_json::json!("x"))])
            .is_err());

        let outputs = model
            .predict(&[PredictionInput::from_file(b"payload".to_vec())])
            .unwrap();
        assert!(matches!(&outputs[0], OutputValue::Binary(b) if b.len() == 32));
    }

    #[test]
    fn unknown_impl_class_is_an_error() {
        assert!(build_plugin("nope", &toml::Table::new()).is_err());
    }
}
