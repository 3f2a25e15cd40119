//! Scheduled rescan + extraction pipelines.
//!
//! Each index database carries its own five-field cron expression in its
//! system configuration. On every tick (at most one minute apart) the
//! scheduler enqueues, for each due index, one folder rescan followed by
//! one extraction job per configured model (models that read source items
//! first, derived-data models after them), all tagged `cronjob`. A due
//! index is skipped while a previous cronjob for it is still queued or
//! running.

use crate::jobs::manager::JobManager;
use crate::jobs::models::parse_model_metadata;
use argus_client::DistributedClient;
use argus_db::system_config::{retrieve_system_config, SystemConfig};
use argus_db::{paths, AccessMode, IndexDb};
use argus_protocol::{JobSpec, JobType};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{error, info, warn};

pub const CRON_TAG: &str = "cronjob";

struct ScheduleEntry {
    cron_string: String,
    next_run: DateTime<Utc>,
}

/// Per-index schedule evaluator.
pub struct CronScheduler {
    entries: Mutex<HashMap<String, ScheduleEntry>>,
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate every index database once.
    pub async fn tick(&self, manager: &JobManager, client: &DistributedClient) {
        let index_dbs = match paths::list_index_dbs() {
            Ok(dbs) => dbs,
            Err(e) => {
                error!("Failed to list index databases: {e}");
                return;
            }
        };
        for index_db in index_dbs {
            if let Err(e) = self.tick_one(&index_db, manager, client).await {
                error!("Cron evaluation failed for {index_db}: {e}");
            }
        }
    }

    async fn tick_one(
        &self,
        index_db: &str,
        manager: &JobManager,
        client: &DistributedClient,
    ) -> anyhow::Result<()> {
        let db = IndexDb::open(&paths::index_db_path(index_db), AccessMode::ReadOnly)?;
        let config = retrieve_system_config(&db)?;
        drop(db);

        let cron_string = match (&config.enable_cron_job, &config.cron_schedule) {
            (true, Some(s)) if !s.trim().is_empty() => s.clone(),
            _ => {
                self.entries.lock().unwrap().remove(index_db);
                return Ok(());
            }
        };

        let due = {
            let mut entries = self.entries.lock().unwrap();
            let now = Utc::now();
            match entries.get(index_db) {
                Some(entry) if entry.cron_string == cron_string => now >= entry.next_run,
                _ => {
                    // New or changed schedule: initialise and wait for the
                    // next occurrence.
                    match next_occurrence(&cron_string, now) {
                        Some(next_run) => {
                            entries.insert(
                                index_db.to_string(),
                                ScheduleEntry {
                                    cron_string: cron_string.clone(),
                                    next_run,
                                },
                            );
                            info!("Cron schedule for {index_db}: next run at {next_run}");
                        }
                        None => {
                            warn!("Invalid cron expression for {index_db}: '{cron_string}'");
                            entries.remove(index_db);
                        }
                    }
                    false
                }
            }
        };

        if due {
            run_cronjob(index_db, &config, manager, client).await;
            let mut entries = self.entries.lock().unwrap();
            match next_occurrence(&cron_string, Utc::now()) {
                Some(next_run) => {
                    entries.insert(
                        index_db.to_string(),
                        ScheduleEntry {
                            cron_string,
                            next_run,
                        },
                    );
                    info!("Next scheduled run for {index_db}: {next_run}");
                }
                None => {
                    entries.remove(index_db);
                }
            }
        }
        Ok(())
    }
}

/// Next fire time of a standard five-field cron expression.
fn next_occurrence(cron_string: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    // The cron crate wants a seconds field; standard five-field expressions
    // fire at second zero.
    let normalized = if cron_string.split_whitespace().count() == 5 {
        format!("0 {cron_string}")
    } else {
        cron_string.to_string()
    };
    let schedule = cron::Schedule::from_str(&normalized).ok()?;
    schedule.after(&after).next()
}

/// Enqueue the rescan + extraction pipeline for one index.
async fn run_cronjob(
    index_db: &str,
    config: &SystemConfig,
    manager: &JobManager,
    client: &DistributedClient,
) {
    if manager.has_tagged_job(CRON_TAG, index_db) {
        info!("A previous cronjob for index {index_db} is still running, skipping");
        return;
    }
    info!("Running cronjob for index {index_db}");

    manager.enqueue(JobSpec {
        queue_id: manager.next_job_id(),
        job_type: JobType::FolderRescan,
        index_db: index_db.to_string(),
        inference_id: None,
        batch_size: None,
        threshold: None,
        log_id: None,
        tag: Some(CRON_TAG.to_string()),
    });

    let metadata = match client.get_metadata().await {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("Could not fetch model metadata for cronjob: {e}");
            return;
        }
    };

    // Source jobs (items) run before derived-data jobs (text/tags) so the
    // latter see fresh inputs.
    let mut src_jobs = Vec::new();
    let mut derived_jobs = Vec::new();
    for scheduled in &config.cron_models {
        let model = match parse_model_metadata(&metadata, &scheduled.inference_id) {
            Ok(model) => model,
            Err(e) => {
                error!(
                    "Model {} is in the cron schedule but not available: {e}",
                    scheduled.inference_id
                );
                continue;
            }
        };
        if model.targets_items() {
            src_jobs.push(scheduled);
        } else {
            derived_jobs.push(scheduled);
        }
    }

    for scheduled in src_jobs.into_iter().chain(derived_jobs) {
        info!(
            "Scheduling extraction for {} (index: {index_db})",
            scheduled.inference_id
        );
        manager.enqueue(JobSpec {
            queue_id: manager.next_job_id(),
            job_type: JobType::DataExtraction,
            index_db: index_db.to_string(),
            inference_id: Some(scheduled.inference_id.clone()),
            batch_size: scheduled.batch_size,
            threshold: scheduled.threshold,
            log_id: None,
            tag: Some(CRON_TAG.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expressions_are_accepted() {
        let now = Utc::now();
        let next = next_occurrence("*/5 * * * *", now).unwrap();
        assert!(next > now);
        assert!((next - now).num_seconds() <= 300);
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        assert!(next_occurrence("not a cron", Utc::now()).is_none());
        assert!(next_occurrence("99 99 * * *", Utc::now()).is_none());
    }
}
