//! Service error model.

use std::time::Duration;

use thiserror::Error;

use mediaflow_core::{DomainError, JobId, StorageError};
use mediaflow_queue::QueueError;

/// Flow stage, for error reporting and logs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    LoadJob,
    Download,
    Probe,
    Concatenate,
    Tag,
    Upload,
}

impl core::fmt::Display for Stage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Stage::LoadJob => "load job",
            Stage::Download => "download",
            Stage::Probe => "probe",
            Stage::Concatenate => "concatenate",
            Stage::Tag => "chapter tagging",
            Stage::Upload => "upload",
        };
        f.write_str(s)
    }
}

/// Failure while executing a flow. The job stays at its last status.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{stage} failed: {source:#}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("variant {0:?} missing from download result")]
    MissingVariant(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("flow cancelled")]
    Cancelled,
}

impl FlowError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            FlowError::Stage { stage, .. } | FlowError::Timeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Failure of a keyed execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DedupError {
    #[error("task for key {key:?} panicked: {message}")]
    Panicked { key: String, message: String },

    #[error("task for key {0:?} was dropped before completing")]
    Dropped(String),
}

/// Job service error.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unknown job type or malformed params; nothing was persisted.
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Dedup(#[from] DedupError),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("url not supported: {0}")]
    UrlNotSupported(String),

    #[error("metadata lookup failed: {0:#}")]
    Metadata(#[source] anyhow::Error),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },
}

impl ServiceError {
    /// Whether the caller sent something unacceptable (as opposed to an internal failure).
    pub fn is_client_error(&self) -> bool {
        matches!(self, ServiceError::Validation(_) | ServiceError::UrlNotSupported(_))
    }
}
