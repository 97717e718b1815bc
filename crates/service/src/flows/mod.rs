//! Flow executors: one stage pipeline per `JobKind`.
//!
//! Constructing a flow only parses and validates the job's params, so it can
//! be done as a dry run before a job is persisted. Executing it runs the
//! stages in order, each under its own deadline, saving the job's status
//! before each stage.

mod concatenate;
mod upload_original;

pub use concatenate::{ConcatenateFlow, ConcatenateParams};
pub use upload_original::{UploadOriginalFlow, UploadOriginalParams};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, error};

use mediaflow_core::{
    DomainError, DomainResult, Downloader, Job, JobId, JobKind, JobStatus, MediaInfo, MediaProcessor, Storage,
    Uploader,
};

use crate::config::ServiceConfig;
use crate::error::{FlowError, Stage};

/// External collaborators a flow runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn Storage>,
    pub downloader: Arc<dyn Downloader>,
    pub processor: Arc<dyn MediaProcessor>,
    pub uploader: Arc<dyn Uploader>,
    pub config: ServiceConfig,
}

impl Collaborators {
    pub fn new(
        storage: Arc<dyn Storage>,
        downloader: Arc<dyn Downloader>,
        processor: Arc<dyn MediaProcessor>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        Self {
            storage,
            downloader,
            processor,
            uploader,
            config: ServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }
}

/// A constructed, ready-to-run flow.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Concatenate(ConcatenateFlow),
    UploadOriginal(UploadOriginalFlow),
}

impl Flow {
    /// Build the flow for `job`, validating its type and params.
    pub fn construct(job_id: &JobId, job: &Job) -> DomainResult<Self> {
        match JobKind::parse(job.job_type())? {
            JobKind::Concatenate => {
                ConcatenateFlow::new(job_id.clone(), ConcatenateParams::from_job(job)?).map(Flow::Concatenate)
            }
            JobKind::UploadOriginal => {
                UploadOriginalFlow::new(job_id.clone(), UploadOriginalParams::from_job(job)?)
                    .map(Flow::UploadOriginal)
            }
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Flow::Concatenate(_) => JobKind::Concatenate,
            Flow::UploadOriginal(_) => JobKind::UploadOriginal,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Flow::Concatenate(flow) => flow.job_id(),
            Flow::UploadOriginal(flow) => flow.job_id(),
        }
    }

    pub async fn execute(&self, deps: &Collaborators) -> Result<(), FlowError> {
        match self {
            Flow::Concatenate(flow) => flow.execute(deps).await,
            Flow::UploadOriginal(flow) => flow.execute(deps).await,
        }
    }
}

/// Deserialize a job's opaque params into a typed struct.
pub(crate) fn parse_params<P: DeserializeOwned>(job: &Job) -> DomainResult<P> {
    if !job.params.params.is_object() {
        return Err(DomainError::validation(format!(
            "{} params must be an object",
            job.job_type()
        )));
    }
    serde_json::from_value(job.params.params.clone())
        .map_err(|e| DomainError::validation(format!("invalid {} params: {e}", job.job_type())))
}

/// Run one collaborator call under its stage deadline.
pub(crate) async fn within<T, F>(stage: Stage, limit: Duration, call: F) -> Result<T, FlowError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(FlowError::Stage { stage, source }),
        Err(_) => Err(FlowError::Timeout { stage, after: limit }),
    }
}

/// The job record a running flow mutates, plus best-effort persistence.
pub(crate) struct Progress<'a> {
    job: Job,
    deps: &'a Collaborators,
}

impl<'a> Progress<'a> {
    /// Fresh read of the job under the state deadline.
    pub(crate) async fn load(job_id: &JobId, deps: &'a Collaborators) -> Result<Self, FlowError> {
        let limit = deps.config.state_timeout;
        let job = tokio::time::timeout(limit, deps.storage.get_job(job_id))
            .await
            .map_err(|_| FlowError::Timeout {
                stage: Stage::LoadJob,
                after: limit,
            })??
            .ok_or_else(|| FlowError::JobNotFound(job_id.clone()))?;
        Ok(Self { job, deps })
    }

    pub(crate) fn job(&self) -> &Job {
        &self.job
    }

    pub(crate) fn record_result(&mut self, info: MediaInfo) {
        self.job.result_media_duration = Some(info.duration);
        self.job.result_file_bytes = Some(info.size_bytes);
    }

    /// Persist a new status. Failures are logged and do not stop the flow.
    pub(crate) async fn set_status(&mut self, status: JobStatus) {
        self.job.status = status;
        let limit = self.deps.config.state_timeout;
        match tokio::time::timeout(limit, self.deps.storage.save_job(&self.job)).await {
            Ok(Ok(())) => debug!(job_id = %self.job.id, status = %status, "job status saved"),
            Ok(Err(e)) => error!(
                job_id = %self.job.id,
                status = %status,
                error = %e,
                "failed to save job state, proceeding"
            ),
            Err(_) => error!(
                job_id = %self.job.id,
                status = %status,
                timeout_ms = limit.as_millis() as u64,
                "timed out saving job state, proceeding"
            ),
        }
    }
}
