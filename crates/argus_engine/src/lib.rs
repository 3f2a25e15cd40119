//! Background job orchestration for Argus.
//!
//! The job manager serializes long-running jobs through a FIFO queue and a
//! single worker slot; each job runs in a fresh worker process so a crash
//! cannot poison the parent. The extraction engine inside the worker streams
//! eligible items from the index, batches them through the inference
//! service, and persists outputs under a cascading job anchor.

pub mod cron;
pub mod extraction;
pub mod jobs;
pub mod util;

pub use cron::CronScheduler;
pub use jobs::manager::{JobManager, WorkerLauncher};
