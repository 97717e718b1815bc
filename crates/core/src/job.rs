//! Job records and their lifecycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Submission parameters: the immutable input a job is created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub url: String,
    /// Tag selecting a flow; validated against `JobKind` when the flow is built.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Flow-specific parameters, interpreted per job type.
    #[serde(default)]
    pub params: JsonValue,
}

impl JobParams {
    pub fn new(url: impl Into<String>, job_type: impl Into<String>, params: JsonValue) -> Self {
        Self {
            url: url.into(),
            job_type: job_type.into(),
            params,
        }
    }
}

/// Closed set of job kinds, one per flow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Download several variants, join them into one file with chapters, upload.
    Concatenate,
    /// Download a single variant and upload it untouched.
    UploadOriginal,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::Concatenate, JobKind::UploadOriginal];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Concatenate => "concatenate",
            JobKind::UploadOriginal => "upload_original",
        }
    }

    /// Resolve a job type tag, rejecting anything that has no flow.
    pub fn parse(tag: &str) -> DomainResult<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| DomainError::unsupported_job_type(tag))
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// User-visible progress of a job.
///
/// Moves forward only. There is no failed state: a job whose flow keeps
/// failing stays at the last status it reached until the queue stops
/// redelivering it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Downloading,
    Processing,
    Uploading,
    Complete,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Downloading => "downloading",
            JobStatus::Processing => "processing",
            JobStatus::Uploading => "uploading",
            JobStatus::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(flatten)]
    pub params: JobParams,
    pub status: JobStatus,
    /// Duration of the produced media, in nanoseconds on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_nanos"
    )]
    pub result_media_duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_file_bytes: Option<u64>,
}

impl Job {
    /// A freshly submitted job (status `created`, no results).
    pub fn new(params: JobParams) -> Self {
        Self {
            id: JobId::for_params(&params),
            params,
            status: JobStatus::Created,
            result_media_duration: None,
            result_file_bytes: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.params.url
    }

    pub fn job_type(&self) -> &str {
        &self.params.job_type
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_nanos))
    }
}
