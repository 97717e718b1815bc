use serde::{Deserialize, Serialize};

use mediaflow_core::JobId;
use mediaflow_queue::QueueStats;
use mediaflow_service::{ServiceStats, Submission};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct MetadataQuery {
    pub url: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub status: &'static str,
    pub id: JobId,
}

impl From<&Submission> for SubmissionResponse {
    fn from(submission: &Submission) -> Self {
        Self {
            status: if submission.is_new() { "accepted" } else { "exists" },
            id: submission.job().id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub service: ServiceStats,
    pub queue: QueueStats,
}
