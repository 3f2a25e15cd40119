//! Shared protocol types for Argus.
//!
//! Everything that crosses a process or crate boundary lives here: model
//! identifiers, prediction inputs and outputs, model metadata, job queue
//! types, and the predict wire codec used by both the inference ingress and
//! the HTTP client.

pub mod jobs;
pub mod metadata;
pub mod types;
pub mod wire;

pub use jobs::{JobModel, JobSpec, JobType, QueueStatus};
pub use metadata::{ModelMetadata, OutputDataType, TargetEntity};
pub use types::{InferenceId, InferenceIdError, OutputValue, PredictionInput};
pub use wire::{WireError, BASE64_TYPE_TAG, MULTIPART_BOUNDARY};
