//! Job queue wire types.
//!
//! The job manager serializes a `JobSpec` to the worker process and reports
//! queue contents as `JobModel` rows. A job is immutable once enqueued.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DataExtraction,
    DataDeletion,
    FolderRescan,
    FolderUpdate,
    JobDataDeletion,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::DataExtraction => "data_extraction",
            JobType::DataDeletion => "data_deletion",
            JobType::FolderRescan => "folder_rescan",
            JobType::FolderUpdate => "folder_update",
            JobType::JobDataDeletion => "job_data_deletion",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a worker process needs to run one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub queue_id: i64,
    pub job_type: JobType,
    /// Name of the index database the job operates on.
    pub index_db: String,
    /// Inference id for extraction/deletion jobs.
    #[serde(default)]
    pub inference_id: Option<String>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Data log id for job-data deletion.
    #[serde(default)]
    pub log_id: Option<i64>,
    /// Free-form marker, e.g. "cronjob".
    #[serde(default)]
    pub tag: Option<String>,
}

/// One row of the queue status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobModel {
    pub queue_id: i64,
    pub job_type: JobType,
    pub index_db: String,
    #[serde(default)]
    pub inference_id: Option<String>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub log_id: Option<i64>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub tag: Option<String>,
}

impl JobModel {
    pub fn from_spec(spec: &JobSpec, running: bool) -> Self {
        Self {
            queue_id: spec.queue_id,
            job_type: spec.job_type,
            index_db: spec.index_db.clone(),
            inference_id: spec.inference_id.clone(),
            batch_size: spec.batch_size,
            threshold: spec.threshold,
            log_id: spec.log_id,
            running,
            tag: spec.tag.clone(),
        }
    }
}

/// Snapshot of the queue: the running job (if any) first, then queued jobs
/// in FIFO order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queue: Vec<JobModel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_value(JobType::DataExtraction).unwrap(),
            serde_json::Value::String("data_extraction".into())
        );
        let t: JobType = serde_json::from_str("\"folder_rescan\"").unwrap();
        assert_eq!(t, JobType::FolderRescan);
    }

    #[test]
    fn job_spec_round_trips() {
        let spec = JobSpec {
            queue_id: 7,
            job_type: JobType::DataExtraction,
            index_db: "default".into(),
            inference_id: Some("ocr/doctr".into()),
            batch_size: Some(16),
            threshold: None,
            log_id: None,
            tag: Some("cronjob".into()),
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: JobSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.queue_id, 7);
        assert_eq!(back.inference_id.as_deref(), Some("ocr/doctr"));
    }
}
