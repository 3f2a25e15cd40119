//! Model metadata resolution against the inference service.

use anyhow::{bail, Context, Result};
use argus_db::system_config::SystemConfig;
use argus_protocol::ModelMetadata;
use serde_json::Value;

/// Parse one model's metadata out of the `/metadata` response, overlaying
/// the group metadata under the model's own.
pub fn parse_model_metadata(metadata: &Value, setter_name: &str) -> Result<ModelMetadata> {
    let (group, name) = setter_name
        .split_once('/')
        .context("inference id must be of the form group/name")?;

    let group_data = metadata
        .get(group)
        .with_context(|| format!("group does not exist: {group}"))?;
    let model_data = group_data
        .get("inference_ids")
        .and_then(|ids| ids.get(name))
        .with_context(|| format!("inference id does not exist: {setter_name}"))?;

    let mut merged = serde_json::Map::new();
    if let Some(obj) = group_data.get("group_metadata").and_then(Value::as_object) {
        merged.extend(obj.clone());
    }
    if let Some(obj) = model_data.as_object() {
        merged.extend(obj.clone());
    }
    merged.insert("group".to_string(), Value::String(group.to_string()));
    merged.insert("inference_id".to_string(), Value::String(name.to_string()));

    let parsed: ModelMetadata = serde_json::from_value(Value::Object(merged))
        .with_context(|| format!("invalid metadata for {setter_name}"))?;
    Ok(parsed)
}

/// Default batch size and threshold for a model, applying per-index
/// overrides: group-wide settings first, model-specific ones on top.
pub fn resolve_job_defaults(model: &ModelMetadata, config: &SystemConfig) -> (u32, Option<f64>) {
    let mut batch_size = model.default_batch_size;
    let mut threshold = model.default_threshold;
    let setter_name = model.setter_name();

    let passes: [&dyn Fn(&argus_db::system_config::JobSetting) -> bool; 2] = [
        &|s| s.group_name == model.group && s.inference_id.is_none(),
        &|s| s.group_name == model.group && s.inference_id.as_deref() == Some(setter_name.as_str()),
    ];
    for matches in passes {
        for setting in config.job_settings.iter().filter(|s| matches(s)) {
            if let Some(size) = setting.default_batch_size {
                batch_size = size;
            }
            if model.default_threshold.is_some() {
                if let Some(t) = setting.default_threshold {
                    threshold = Some(t);
                }
            }
        }
    }
    (batch_size, threshold)
}

/// Check a model exists in a `/metadata` response.
pub fn model_exists(metadata: &Value, setter_name: &str) -> bool {
    parse_model_metadata(metadata, setter_name).is_ok()
}

/// Parse every model in a `/metadata` response (used by the cron pipeline to
/// order jobs).
pub fn parse_all(metadata: &Value) -> Result<Vec<ModelMetadata>> {
    let Some(groups) = metadata.as_object() else {
        bail!("metadata response is not an object");
    };
    let mut models = Vec::new();
    for (group, group_data) in groups {
        if let Some(ids) = group_data.get("inference_ids").and_then(Value::as_object) {
            for name in ids.keys() {
                models.push(parse_model_metadata(metadata, &format!("{group}/{name}"))?);
            }
        }
    }
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_db::system_config::JobSetting;
    use argus_protocol::TargetEntity;

    fn metadata_fixture() -> Value {
        serde_json::json!({
            "ocr": {
                "group_metadata": {
                    "input_handler": "file_bytes",
                    "output_type": "text",
                    "input_mime_types": ["image/"],
                },
                "inference_ids": {
                    "doctr": { "default_batch_size": 16 },
                    "tess": { "output_type": "text" }
                }
            }
        })
    }

    #[test]
    fn group_metadata_overlays_under_model() {
        let model = parse_model_metadata(&metadata_fixture(), "ocr/doctr").unwrap();
        assert_eq!(model.group, "ocr");
        assert_eq!(model.inference_id, "doctr");
        assert_eq!(model.input_handler, "file_bytes");
        assert_eq!(model.default_batch_size, 16);
        assert_eq!(model.input_mime_types, vec!["image/"]);
        assert_eq!(model.target_entities, vec![TargetEntity::Items]);
    }

    #[test]
    fn unknown_models_are_reported() {
        let metadata = metadata_fixture();
        assert!(parse_model_metadata(&metadata, "ocr/nope").is_err());
        assert!(parse_model_metadata(&metadata, "nope/doctr").is_err());
        assert!(model_exists(&metadata, "ocr/doctr"));
    }

    #[test]
    fn job_settings_override_defaults_most_specific_last() {
        let model = parse_model_metadata(&metadata_fixture(), "ocr/doctr").unwrap();
        let config = SystemConfig {
            job_settings: vec![
                JobSetting {
                    group_name: "ocr".into(),
                    inference_id: None,
                    default_batch_size: Some(32),
                    default_threshold: None,
                },
                JobSetting {
                    group_name: "ocr".into(),
                    inference_id: Some("ocr/doctr".into()),
                    default_batch_size: Some(4),
                    default_threshold: None,
                },
            ],
            ..Default::default()
        };
        let (batch_size, threshold) = resolve_job_defaults(&model, &config);
        assert_eq!(batch_size, 4);
        assert!(threshold.is_none());
    }
}
