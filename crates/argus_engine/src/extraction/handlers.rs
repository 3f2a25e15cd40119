//! Typed output handlers.
//!
//! One handler per output type. Every handler writes a placeholder row when
//! an item yields no output, so the item is not rediscovered on the next
//! run.

use crate::extraction::input::JobInputData;
use anyhow::{bail, Context, Result};
use argus_db::embeddings::add_embedding;
use argus_db::extracted_text::add_extracted_text;
use argus_db::item_data::add_item_data;
use argus_db::tags::{add_tag_to_data, upsert_tag};
use argus_db::{deserialize_f32, IndexDb};
use argus_protocol::{ModelMetadata, OutputDataType, OutputValue, PredictionInput};

/// Output handler: persists one item's outputs inside the caller's
/// transaction.
pub type OutputHandler<'a> = dyn FnMut(&IndexDb, i64, &JobInputData, &[PredictionInput], &[OutputValue]) -> Result<()>
    + 'a;

/// Build the output handler for a model's output type.
pub fn make_output_handler(
    model: &ModelMetadata,
    threshold: Option<f64>,
) -> Box<OutputHandler<'static>> {
    let setter = model.setter_name();
    match model.output_type {
        OutputDataType::Text => Box::new(move |db, job_id, item, _units, outputs| {
            handle_text(db, job_id, &setter, item, outputs)
        }),
        OutputDataType::Tags => Box::new(move |db, job_id, item, _units, outputs| {
            handle_tags(db, job_id, &setter, item, outputs, threshold)
        }),
        OutputDataType::Clip => Box::new(move |db, job_id, item, _units, outputs| {
            handle_clip(db, job_id, &setter, item, outputs)
        }),
        OutputDataType::TextEmbedding => Box::new(move |db, job_id, item, _units, outputs| {
            handle_text_embeddings(db, job_id, &setter, item, outputs)
        }),
    }
}

/// Insert a placeholder marking "processed, no output".
fn add_placeholder(
    db: &IndexDb,
    job_id: i64,
    setter: &str,
    item: &JobInputData,
    data_type: OutputDataType,
) -> Result<()> {
    add_item_data(
        db,
        &item.sha256,
        setter,
        job_id,
        data_type,
        0,
        item.data_id,
        true,
    )?;
    Ok(())
}

/// Text outputs: strings or `{text, language?, language_confidence?,
/// confidence?}` objects. Empty strings do not produce rows.
fn handle_text(
    db: &IndexDb,
    job_id: i64,
    setter: &str,
    item: &JobInputData,
    outputs: &[OutputValue],
) -> Result<()> {
    let mut index = 0i64;
    for output in outputs {
        let value = output
            .as_json()
            .context("text handler expects structured outputs")?;
        let (text, language, language_confidence, confidence) = match value {
            serde_json::Value::String(s) => (s.as_str(), None, None, None),
            serde_json::Value::Object(map) => (
                map.get("text").and_then(|v| v.as_str()).unwrap_or(""),
                map.get("language").and_then(|v| v.as_str()),
                map.get("language_confidence").and_then(|v| v.as_f64()),
                map.get("confidence").and_then(|v| v.as_f64()),
            ),
            other => bail!("unexpected text output shape: {other}"),
        };
        if text.trim().is_empty() {
            continue;
        }
        let data_id = add_item_data(
            db,
            &item.sha256,
            setter,
            job_id,
            OutputDataType::Text,
            index,
            item.data_id,
            false,
        )?;
        add_extracted_text(db, data_id, text, language, language_confidence, confidence)?;
        index += 1;
    }
    if index == 0 {
        add_placeholder(db, job_id, setter, item, OutputDataType::Text)?;
    }
    Ok(())
}

/// Tag outputs: `{namespace: {tag: confidence, ...}, ...}` per work unit.
/// Tags below the threshold are dropped.
fn handle_tags(
    db: &IndexDb,
    job_id: i64,
    setter: &str,
    item: &JobInputData,
    outputs: &[OutputValue],
    threshold: Option<f64>,
) -> Result<()> {
    let mut wrote_any = false;
    for (index, output) in outputs.iter().enumerate() {
        let namespaces = output
            .as_json()
            .and_then(|v| v.as_object())
            .context("tags handler expects an object output")?;

        let mut pairs: Vec<(&str, &str, f64)> = Vec::new();
        for (namespace, tags) in namespaces {
            let Some(tags) = tags.as_object() else {
                bail!("namespace '{namespace}' does not map tags to confidences");
            };
            for (tag, confidence) in tags {
                let confidence = confidence.as_f64().unwrap_or(1.0);
                if threshold.map(|t| confidence >= t).unwrap_or(true) {
                    pairs.push((namespace, tag, confidence));
                }
            }
        }
        if pairs.is_empty() {
            continue;
        }
        let data_id = add_item_data(
            db,
            &item.sha256,
            setter,
            job_id,
            OutputDataType::Tags,
            index as i64,
            item.data_id,
            false,
        )?;
        for (namespace, tag, confidence) in pairs {
            let tag_id = upsert_tag(db, namespace, tag)?;
            add_tag_to_data(db, data_id, tag_id, confidence)?;
        }
        wrote_any = true;
    }
    if !wrote_any {
        add_placeholder(db, job_id, setter, item, OutputDataType::Tags)?;
    }
    Ok(())
}

/// Clip outputs: one raw f32 embedding blob per work unit.
fn handle_clip(
    db: &IndexDb,
    job_id: i64,
    setter: &str,
    item: &JobInputData,
    outputs: &[OutputValue],
) -> Result<()> {
    let mut wrote_any = false;
    for (index, output) in outputs.iter().enumerate() {
        let blob = output
            .as_binary()
            .context("clip handler expects binary outputs")?;
        let embedding = deserialize_f32(blob)?;
        if embedding.is_empty() {
            continue;
        }
        let data_id = add_item_data(
            db,
            &item.sha256,
            setter,
            job_id,
            OutputDataType::Clip,
            index as i64,
            item.data_id,
            false,
        )?;
        add_embedding(db, data_id, &embedding)?;
        wrote_any = true;
    }
    if !wrote_any {
        add_placeholder(db, job_id, setter, item, OutputDataType::Clip)?;
    }
    Ok(())
}

/// Text-embedding outputs: one blob per work unit, chained to the source
/// text row through `source_id`.
fn handle_text_embeddings(
    db: &IndexDb,
    job_id: i64,
    setter: &str,
    item: &JobInputData,
    outputs: &[OutputValue],
) -> Result<()> {
    let mut wrote_any = false;
    for (index, output) in outputs.iter().enumerate() {
        let blob = output
            .as_binary()
            .context("text-embedding handler expects binary outputs")?;
        let embedding = deserialize_f32(blob)?;
        if embedding.is_empty() {
            continue;
        }
        let data_id = add_item_data(
            db,
            &item.sha256,
            setter,
            job_id,
            OutputDataType::TextEmbedding,
            index as i64,
            item.data_id,
            false,
        )?;
        add_embedding(db, data_id, &embedding)?;
        wrote_any = true;
    }
    if !wrote_any {
        add_placeholder(db, job_id, setter, item, OutputDataType::TextEmbedding)?;
    }
    Ok(())
}
