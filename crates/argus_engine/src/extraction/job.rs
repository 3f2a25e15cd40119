//! The extraction job loop.
//!
//! Streams eligible rows from the index, accumulates work units through the
//! input handler until the batch size is reached, runs the fused batch
//! through the inferer in minibatches, and hands each item's outputs to the
//! output handler inside its own transaction. Per-item failures are recorded
//! and skipped; an inference failure aborts the job, whose partial outputs
//! are swept on the next run.

use crate::extraction::discovery::build_job_query;
use crate::extraction::input::JobInputData;
use crate::util::estimate_eta;
use anyhow::{ensure, Context, Result};
use argus_db::extraction_log::{add_data_log, remove_incomplete_jobs, update_log, LogCounters};
use argus_db::setters::upsert_setter;
use argus_db::system_config::SystemConfig;
use argus_db::IndexDb;
use argus_protocol::{ModelMetadata, OutputValue, PredictionInput};
use argus_pql::{prepare_query, search_stream, PqlQuery, QueryEmbedder};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{error, info};

/// Final report of one extraction job.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub job_id: Option<i64>,
    pub processed: i64,
    pub images: i64,
    pub videos: i64,
    pub other: i64,
    pub units: i64,
    pub failed_paths: Vec<String>,
}

struct BatchItem {
    item: JobInputData,
    units: Vec<PredictionInput>,
}

struct JobState<'a> {
    job_id: i64,
    batch: Vec<BatchItem>,
    unit_count: usize,
    counters: LogCounters,
    processed: i64,
    failed: HashMap<String, String>,
    fatal: Option<anyhow::Error>,
    remaining: i64,
    start_time: chrono::DateTime<Utc>,
    setter: &'a str,
}

/// Run one extraction job to completion.
///
/// `db` is the writer connection; `reader` is a second read-only connection
/// used for streaming discovery, so per-item commits never disturb the open
/// cursor (under WAL the stream keeps its snapshot, which is what makes the
/// job resumable: items processed mid-run only drop out of discovery on the
/// next run).
#[allow(clippy::too_many_arguments)]
pub fn run_extraction_job(
    db: &IndexDb,
    reader: &IndexDb,
    config: &SystemConfig,
    model: &ModelMetadata,
    batch_size: usize,
    threshold: Option<f64>,
    embedder: &dyn QueryEmbedder,
    input_transform: &mut dyn FnMut(&JobInputData) -> Result<Vec<PredictionInput>>,
    run_batch_inference: &mut dyn FnMut(&[PredictionInput]) -> Result<Vec<OutputValue>>,
    output_handler: &mut dyn FnMut(
        &IndexDb,
        i64,
        &JobInputData,
        &[PredictionInput],
        &[OutputValue],
    ) -> Result<()>,
) -> Result<ExtractionReport> {
    let batch_size = batch_size.max(1);
    let setter = model.setter_name();

    // Sweep any stale incomplete job before starting; cascading deletes its
    // partial outputs.
    db.with_transaction(|tx| remove_incomplete_jobs(tx).map(|_| ()))
        .context("failed to clean up incomplete jobs")?;

    let query = build_job_query(model, config)?;
    let query = prepare_query(query, embedder).context("failed to prepare discovery query")?;

    let initial_remaining = count_remaining(reader, &query)?;
    if initial_remaining < 1 {
        info!("No items to process, aborting {setter}");
        return Ok(ExtractionReport::default());
    }

    let start_time = Utc::now();
    let scan_time = start_time.to_rfc3339();

    let job_id = db.with_transaction(|tx| {
        let job_id = add_data_log(
            tx,
            &scan_time,
            threshold,
            model.output_type.as_str(),
            &setter,
            batch_size as u32,
        )?;
        upsert_setter(tx, &setter)?;
        Ok(job_id)
    })?;
    info!("Starting {setter} job {job_id}: {initial_remaining} items");

    let mut state = JobState {
        job_id,
        batch: Vec::new(),
        unit_count: 0,
        counters: LogCounters {
            total_remaining: initial_remaining,
            ..Default::default()
        },
        processed: 0,
        failed: HashMap::new(),
        fatal: None,
        remaining: initial_remaining,
        start_time,
        setter: &setter,
    };

    search_stream(reader, &query, |result, remaining| {
        let item = JobInputData::from(result);
        state.remaining = remaining;
        if state.failed.contains_key(&item.failure_key()) {
            return Ok(true);
        }

        let load_start = Instant::now();
        let units = match input_transform(&item) {
            Ok(units) => units,
            Err(e) => {
                error!("Error processing item {}: {e}", item.path);
                state.failed.insert(item.failure_key(), item.path.clone());
                return Ok(true);
            }
        };
        state.counters.data_load_time += load_start.elapsed().as_secs_f64();

        state.unit_count += units.len();
        state.batch.push(BatchItem { item, units });

        if state.unit_count >= batch_size {
            if let Err(e) = flush_batch(
                db,
                &mut state,
                batch_size,
                run_batch_inference,
                output_handler,
            ) {
                state.fatal = Some(e);
                return Ok(false);
            }
        }
        Ok(true)
    })
    .context("work discovery failed")?;

    if let Some(e) = state.fatal.take() {
        return Err(e);
    }
    flush_batch(db, &mut state, batch_size, run_batch_inference, output_handler)?;

    info!(
        "Processed {} items: {} images and {} videos totalling {} units",
        state.processed, state.counters.image_files, state.counters.video_files,
        state.counters.total_segments
    );

    // Re-derive the remaining count: processed items now carry data or
    // placeholders, failed ones stay eligible.
    let final_remaining = count_remaining(reader, &query)?;
    state.counters.errors = state.failed.len() as i64;
    state.counters.total_remaining = final_remaining;
    db.with_transaction(|tx| update_log(tx, job_id, &state.counters, true))?;

    Ok(ExtractionReport {
        job_id: Some(job_id),
        processed: state.processed,
        images: state.counters.image_files,
        videos: state.counters.video_files,
        other: state.counters.other_files,
        units: state.counters.total_segments,
        failed_paths: state.failed.into_values().collect(),
    })
}

fn count_remaining(db: &IndexDb, query: &PqlQuery) -> Result<i64> {
    let mut count_query = query.clone();
    count_query.results = false;
    count_query.count = true;
    let (total, _, _) = search_stream(db, &count_query, |_, _| Ok(true))?;
    Ok(total)
}

/// Run the accumulated batch through inference and the output handler.
fn flush_batch(
    db: &IndexDb,
    state: &mut JobState<'_>,
    batch_size: usize,
    run_batch_inference: &mut dyn FnMut(&[PredictionInput]) -> Result<Vec<OutputValue>>,
    output_handler: &mut dyn FnMut(
        &IndexDb,
        i64,
        &JobInputData,
        &[PredictionInput],
        &[OutputValue],
    ) -> Result<()>,
) -> Result<()> {
    if state.batch.is_empty() {
        return Ok(());
    }
    let batch = std::mem::take(&mut state.batch);
    state.unit_count = 0;

    let fused: Vec<PredictionInput> = batch
        .iter()
        .flat_map(|entry| entry.units.iter().cloned())
        .collect();

    let inference_start = Instant::now();
    let outputs = minibatcher(&fused, batch_size, run_batch_inference)
        .context("batch inference failed")?;
    state.counters.inference_time += inference_start.elapsed().as_secs_f64();
    state.counters.total_segments += fused.len() as i64;

    let mut cursor = 0usize;
    for entry in batch {
        let item_outputs = &outputs[cursor..cursor + entry.units.len()];
        cursor += entry.units.len();
        state.processed += 1;

        let handled = db.with_transaction(|tx| {
            output_handler(tx, state.job_id, &entry.item, &entry.units, item_outputs)
                .map_err(|e| argus_db::DbError::InvalidInput(e.to_string()))?;
            Ok(())
        });
        if let Err(e) = handled {
            error!("Error handling item {}: {e}", entry.item.path);
            state
                .failed
                .insert(entry.item.failure_key(), entry.item.path.clone());
            continue;
        }

        if entry.item.mime_type.starts_with("video") {
            state.counters.video_files += 1;
        } else if entry.item.mime_type.starts_with("image") {
            state.counters.image_files += 1;
        } else {
            state.counters.other_files += 1;
        }

        let total = state.remaining + state.processed;
        let eta = estimate_eta(state.start_time, state.processed, state.remaining);
        info!(
            "{}: ({}/{total}) (ETA: {eta}) Processed ({}) {}",
            state.setter, state.processed, entry.item.mime_type, entry.item.path
        );

        state.counters.errors = state.failed.len() as i64;
        state.counters.total_remaining = state.remaining;
        update_log(db, state.job_id, &state.counters, false)?;
    }
    Ok(())
}

/// Process a fused work-unit list in fixed-size chunks, preserving order.
fn minibatcher(
    inputs: &[PredictionInput],
    batch_size: usize,
    run_minibatch: &mut dyn FnMut(&[PredictionInput]) -> Result<Vec<OutputValue>>,
) -> Result<Vec<OutputValue>> {
    let mut outputs = Vec::with_capacity(inputs.len());
    for chunk in inputs.chunks(batch_size.max(1)) {
        let chunk_outputs = run_minibatch(chunk)?;
        ensure!(
            chunk_outputs.len() == chunk.len(),
            "minibatch returned {} outputs for {} inputs",
            chunk_outputs.len(),
            chunk.len()
        );
        outputs.extend(chunk_outputs);
    }
    ensure!(
        outputs.len() == inputs.len(),
        "inference returned {} outputs for {} inputs",
        outputs.len(),
        inputs.len()
    );
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minibatcher_splits_and_preserves_order() {
        let inputs: Vec<PredictionInput> = (0..7)
            .map(|i| PredictionInput::from_data(serde_json::json!(i)))
            .collect();
        let mut sizes = Vec::new();
        let outputs = minibatcher(&inputs, 3, &mut |chunk| {
            sizes.push(chunk.len());
            Ok(chunk
                .iter()
                .map(|c| OutputValue::Json(c.data.clone().unwrap()))
                .collect())
        })
        .unwrap();
        assert_eq!(sizes, vec![3, 3, 1]);
        for (i, output) in outputs.iter().enumerate() {
            assert_eq!(output.as_json().unwrap(), &serde_json::json!(i));
        }
    }

    #[test]
    fn minibatcher_rejects_shape_mismatch() {
        let inputs: Vec<PredictionInput> = (0..3)
            .map(|i| PredictionInput::from_data(serde_json::json!(i)))
            .collect();
        let result = minibatcher(&inputs, 8, &mut |_| Ok(vec![]));
        assert!(result.is_err());
    }
}
