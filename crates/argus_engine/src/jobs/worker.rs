//! Worker-side job execution.
//!
//! Runs inside the process the job manager spawned. The worker owns its own
//! database connections and inference client; nothing is shared with the
//! parent. Exit code 0 means the job finished, anything else is a failure;
//! the parent does not interpret further.

use crate::extraction::handlers::make_output_handler;
use crate::extraction::input::make_input_transform;
use crate::extraction::job::run_extraction_job;
use crate::jobs::models::{parse_model_metadata, resolve_job_defaults};
use crate::util::{inference_api_urls, inference_api_url_weights};
use anyhow::{bail, Context, Result};
use argus_client::DistributedClient;
use argus_db::files::{end_file_scan, list_available_files, mark_unavailable, start_file_scan};
use argus_db::folders::get_folders;
use argus_db::system_config::retrieve_system_config;
use argus_db::tags::delete_orphan_tags;
use argus_db::{paths, schema, AccessMode, IndexDb};
use argus_pql::EmbedArgs;
use argus_protocol::{JobSpec, JobType, PredictionInput};
use tracing::{info, warn};

/// Entry point for the `job-worker` subcommand.
pub fn execute_job(spec: &JobSpec) -> Result<()> {
    info!("Worker executing job {}: {}", spec.queue_id, spec.job_type);
    let db_path = paths::index_db_path(&spec.index_db);
    if !db_path.exists() {
        bail!("index database does not exist: {}", spec.index_db);
    }
    let db = IndexDb::open(&db_path, AccessMode::ReadWrite)?;
    schema::init_schema(&db)?;

    match spec.job_type {
        JobType::DataExtraction => {
            let inference_id = spec
                .inference_id
                .as_deref()
                .context("data extraction requires an inference id")?;
            let reader = IndexDb::open(&db_path, AccessMode::ReadOnly)?;
            run_data_extraction_job(
                &db,
                &reader,
                inference_id,
                spec.batch_size,
                spec.threshold,
            )
        }
        JobType::DataDeletion => {
            let inference_id = spec
                .inference_id
                .as_deref()
                .context("data deletion requires an inference id")?;
            delete_model_data(&db, inference_id)
        }
        JobType::JobDataDeletion => {
            let log_id = spec.log_id.context("job data deletion requires a log id")?;
            db.with_transaction(|tx| {
                argus_db::extraction_log::delete_data_job_by_log_id(tx, log_id)
            })?;
            info!("Deleted data for log {log_id}");
            Ok(())
        }
        JobType::FolderRescan => rescan_folders(&db).map(|_| ()),
        JobType::FolderUpdate => run_folder_update(&db),
    }
}

/// An embedder backed by the inference service, for semantic job filters.
struct ClientEmbedder<'a> {
    runtime: &'a tokio::runtime::Runtime,
    client: &'a DistributedClient,
}

impl argus_pql::QueryEmbedder for ClientEmbedder<'_> {
    fn embed(
        &self,
        text: &str,
        model: &str,
        args: &argus_pql::EmbedArgs,
    ) -> std::result::Result<Vec<u8>, String> {
        let input = PredictionInput::from_data(serde_json::json!({ "text": text }));
        let outputs = self
            .runtime
            .block_on(self.client.predict(
                model,
                &args.cache_key,
                args.lru_size,
                args.ttl_seconds,
                vec![input],
            ))
            .map_err(|e| e.to_string())?;
        outputs
            .first()
            .and_then(|o| o.as_binary())
            .map(|b| b.to_vec())
            .ok_or_else(|| format!("model {model} returned no embedding"))
    }
}

/// Cache parameters used by extraction jobs on the inference side.
fn job_embed_args() -> EmbedArgs {
    EmbedArgs {
        cache_key: "data_extraction".to_string(),
        lru_size: 1,
        ttl_seconds: -1,
    }
}

pub fn run_data_extraction_job(
    db: &IndexDb,
    reader: &IndexDb,
    inference_id: &str,
    batch_size: Option<u32>,
    threshold: Option<f64>,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let client = DistributedClient::new(inference_api_urls(), inference_api_url_weights())
        .context("failed to build inference client")?;

    let metadata = runtime
        .block_on(client.get_metadata())
        .context("failed to fetch model metadata from the inference service")?;
    let model = parse_model_metadata(&metadata, inference_id)?;
    let config = retrieve_system_config(db)?;

    let (default_batch_size, default_threshold) = resolve_job_defaults(&model, &config);
    let batch_size = batch_size.filter(|b| *b >= 1).unwrap_or(default_batch_size) as usize;
    let threshold = threshold.or(default_threshold);

    let embed_args = job_embed_args();
    let setter = model.setter_name();
    let embedder = ClientEmbedder {
        runtime: &runtime,
        client: &client,
    };

    let mut input_transform = make_input_transform(&model, threshold)?;
    let mut output_handler = make_output_handler(&model, threshold);
    let mut inferer = |units: &[PredictionInput]| {
        runtime
            .block_on(client.predict(
                &setter,
                &embed_args.cache_key,
                embed_args.lru_size,
                embed_args.ttl_seconds,
                units.to_vec(),
            ))
            .context("inference request failed")
    };

    let report = run_extraction_job(
        db,
        reader,
        &config,
        &model,
        batch_size,
        threshold,
        &embedder,
        input_transform.as_mut(),
        &mut inferer,
        output_handler.as_mut(),
    );

    // The model is no longer needed by this job either way.
    if let Err(e) = runtime.block_on(client.unload_model(&setter, &embed_args.cache_key)) {
        warn!("Failed to unload {setter} after job: {e}");
    }

    let report = report?;
    info!(
        "Extraction finished for {setter}: {} items, {} units, {} failed",
        report.processed,
        report.units,
        report.failed_paths.len()
    );
    for path in &report.failed_paths {
        warn!("Failed: {path}");
    }
    Ok(())
}

/// Delete everything a model wrote into this index.
pub fn delete_model_data(db: &IndexDb, setter_name: &str) -> Result<()> {
    let data_types = argus_db::setters::get_setter_data_types(db, setter_name)?;
    db.with_transaction(|tx| {
        argus_db::setters::delete_setter_by_name(tx, setter_name)?;
        Ok(())
    })?;
    info!("Deleted data extracted by {setter_name}");
    if data_types.iter().any(|t| t == "tags") {
        let orphans = db.with_transaction(delete_orphan_tags)?;
        info!("Deleted {orphans} orphaned tags");
    }
    Ok(())
}

/// Re-stat every available file and flag the missing ones.
///
/// The filesystem walker that discovers new files is a separate concern;
/// rescan only refreshes what the index already knows.
pub fn rescan_folders(db: &IndexDb) -> Result<i64> {
    let scan_id = start_file_scan(db, "<rescan>")?;
    let mut available = 0i64;
    let mut marked = 0i64;
    for file in list_available_files(db)? {
        if std::path::Path::new(&file.path).exists() {
            available += 1;
        } else {
            mark_unavailable(db, file.id)?;
            marked += 1;
        }
    }
    end_file_scan(db, scan_id, available, marked, 0)?;
    info!("Rescan complete: {available} available, {marked} newly unavailable");
    Ok(marked)
}

/// Apply the folder lists: files outside the included roots (or under an
/// excluded root) go unavailable, then a rescan refreshes the rest.
pub fn run_folder_update(db: &IndexDb) -> Result<()> {
    let folders = get_folders(db)?;
    let included: Vec<&str> = folders
        .iter()
        .filter(|f| f.included)
        .map(|f| f.path.as_str())
        .collect();
    let excluded: Vec<&str> = folders
        .iter()
        .filter(|f| !f.included)
        .map(|f| f.path.as_str())
        .collect();

    if !included.is_empty() || !excluded.is_empty() {
        for file in list_available_files(db)? {
            let keep = (included.is_empty()
                || included.iter().any(|root| file.path.starts_with(root)))
                && !excluded.iter().any(|root| file.path.starts_with(root));
            if !keep {
                mark_unavailable(db, file.id)?;
            }
        }
    }
    rescan_folders(db)?;
    Ok(())
}
