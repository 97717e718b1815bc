//! Job service: submission, lookup, and the queue handler that runs flows.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use mediaflow_core::{DomainResult, Job, JobId, JobParams, Metadata};
use mediaflow_queue::{JobQueue, handler_fn};

use crate::dedup::KeyedExecutor;
use crate::error::{FlowError, ServiceError};
use crate::flows::{Collaborators, Flow};

/// Queue channel carrying references to jobs that need processing.
pub const PROCESS_JOB_TYPE: &str = "process";

/// Outcome of a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// A new job was persisted and enqueued.
    Created(Job),
    /// A job with the same params already existed; nothing was enqueued.
    Existing(Job),
}

impl Submission {
    pub fn job(&self) -> &Job {
        match self {
            Submission::Created(job) | Submission::Existing(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Submission::Created(job) | Submission::Existing(job) => job,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Submission::Created(_))
    }
}

/// Service runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub last_flow_duration_ms: u64,
}

struct Inner {
    deps: Collaborators,
    queue: Arc<dyn JobQueue>,
    metadata_lookups: KeyedExecutor,
    stats: Mutex<ServiceStats>,
}

/// Cheaply cloneable handle to the job service.
#[derive(Clone)]
pub struct JobService {
    inner: Arc<Inner>,
}

impl JobService {
    pub fn new(deps: Collaborators, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                queue,
                metadata_lookups: KeyedExecutor::new(),
                stats: Mutex::new(ServiceStats::default()),
            }),
        }
    }

    pub fn stats(&self) -> ServiceStats {
        self.stats_guard().clone()
    }

    /// Register the `process` handler and start consuming the queue.
    pub fn start(&self) -> Result<(), ServiceError> {
        let service: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.queue.subscribe(
            PROCESS_JOB_TYPE,
            handler_fn(move |payload, token| {
                let service = service.upgrade().map(|inner| JobService { inner });
                async move {
                    match service {
                        Some(service) => Ok(service.on_published_job(&payload, token).await?),
                        None => anyhow::bail!("job service dropped"),
                    }
                }
            }),
        )?;
        self.inner.queue.run()?;
        info!(job_type = PROCESS_JOB_TYPE, "job service started");
        Ok(())
    }

    /// Stop consuming and wait for running flows to finish.
    pub async fn stop(&self) {
        self.inner.queue.shutdown().await;
        info!(stats = ?self.stats(), "job service stopped");
    }

    /// Submit a job.
    ///
    /// Validation happens before anything is written: an invalid submission
    /// leaves no record and publishes nothing. When publishing fails the saved
    /// record is removed again, so a retried submission is treated as new.
    /// Resubmitting identical params after a successful publish returns the
    /// existing job without enqueueing it again.
    #[instrument(skip(self, params), fields(url = %params.url, job_type = %params.job_type), err)]
    pub async fn create_job(&self, params: JobParams) -> Result<Submission, ServiceError> {
        let job = Job::new(params);
        let id = job.id.clone();

        self.construct_flow(&id, &job)?;

        if let Some(existing) = self.load_job(&id).await? {
            debug!(job_id = %id, status = %existing.status, "job already exists");
            return Ok(Submission::Existing(existing));
        }

        let limit = self.inner.deps.config.state_timeout;
        tokio::time::timeout(limit, self.inner.deps.storage.save_job(&job))
            .await
            .map_err(|_| ServiceError::Timeout {
                operation: "save job",
                after: limit,
            })??;

        let payload = serde_json::Value::from(id.as_str()).to_string().into_bytes();
        let limit = self.inner.deps.config.publish_timeout;
        let published = tokio::time::timeout(limit, self.inner.queue.publish(PROCESS_JOB_TYPE, &payload))
            .await
            .map_err(|_| ServiceError::Timeout {
                operation: "publish job",
                after: limit,
            })
            .and_then(|result| result.map_err(ServiceError::from));
        if let Err(e) = published {
            self.discard_unpublished(&id).await;
            return Err(e);
        }

        self.stats_guard().jobs_created += 1;
        info!(job_id = %id, "job created");
        Ok(Submission::Created(job))
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>, ServiceError> {
        self.load_job(id).await
    }

    /// Build the flow for a job. Pure: no collaborator is touched.
    pub fn construct_flow(&self, job_id: &JobId, job: &Job) -> DomainResult<Flow> {
        Flow::construct(job_id, job)
    }

    /// Queue handler for the `process` channel.
    ///
    /// The payload is the JSON-encoded job id. A payload that is not a job id
    /// can never succeed, so it is logged and dropped instead of retried.
    pub async fn on_published_job(&self, payload: &[u8], token: CancellationToken) -> Result<(), ServiceError> {
        let id = match decode_job_id(payload) {
            Ok(id) => id,
            Err(reason) => {
                error!(
                    payload = %String::from_utf8_lossy(payload),
                    reason = %reason,
                    "dropping malformed process message"
                );
                return Ok(());
            }
        };

        let job = self
            .load_job(&id)
            .await?
            .ok_or_else(|| ServiceError::JobNotFound(id.clone()))?;
        let flow = self.construct_flow(&id, &job)?;

        info!(job_id = %id, job_type = %flow.kind(), status = %job.status, "executing flow");
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(FlowError::Cancelled),
            result = flow.execute(&self.inner.deps) => result,
        };
        let elapsed = started.elapsed();

        let mut stats = self.stats_guard();
        stats.last_flow_duration_ms = elapsed.as_millis() as u64;
        match &result {
            Ok(()) => {
                stats.jobs_completed += 1;
                drop(stats);
                info!(job_id = %id, elapsed_ms = elapsed.as_millis() as u64, "flow completed");
            }
            Err(e) => {
                stats.jobs_failed += 1;
                drop(stats);
                error!(
                    job_id = %id,
                    job_type = %flow.kind(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "flow failed"
                );
            }
        }
        Ok(result?)
    }

    /// Metadata for `url`, cached in storage.
    ///
    /// Concurrent lookups of the same URL run one at a time so only the first
    /// one reaches the downloader; the rest are served from the cache.
    /// Cancelling the caller only stops its wait.
    pub async fn get_metadata(&self, url: &str) -> Result<Metadata, ServiceError> {
        let service = self.clone();
        let owned_url = url.to_string();
        self.inner
            .metadata_lookups
            .run(url, async move { service.fetch_metadata(&owned_url).await })
            .await?
    }

    async fn fetch_metadata(&self, url: &str) -> Result<Metadata, ServiceError> {
        let limit = self.inner.deps.config.metadata_timeout;
        tokio::time::timeout(limit, self.fetch_metadata_uncapped(url))
            .await
            .map_err(|_| ServiceError::Timeout {
                operation: "metadata lookup",
                after: limit,
            })?
    }

    async fn fetch_metadata_uncapped(&self, url: &str) -> Result<Metadata, ServiceError> {
        let deps = &self.inner.deps;

        match deps.storage.get_metadata(url).await {
            Ok(Some(metadata)) => {
                debug!(url, "metadata served from storage");
                return Ok(metadata);
            }
            Ok(None) => {}
            Err(e) => warn!(url, error = %e, "error getting metadata from storage, will continue"),
        }

        if !deps.downloader.accepts_url(url) {
            return Err(ServiceError::UrlNotSupported(url.to_string()));
        }

        debug!(url, "fetching metadata from downloader");
        let metadata = deps
            .downloader
            .get_metadata(url)
            .await
            .map_err(ServiceError::Metadata)?;

        if let Err(e) = deps.storage.save_metadata(&metadata).await {
            warn!(url, error = %e, "error saving metadata to storage, will continue");
        }
        Ok(metadata)
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>, ServiceError> {
        let limit = self.inner.deps.config.state_timeout;
        Ok(tokio::time::timeout(limit, self.inner.deps.storage.get_job(id))
            .await
            .map_err(|_| ServiceError::Timeout {
                operation: "load job",
                after: limit,
            })??)
    }

    /// Best effort: a record left behind here would never be processed.
    async fn discard_unpublished(&self, id: &JobId) {
        let limit = self.inner.deps.config.state_timeout;
        match tokio::time::timeout(limit, self.inner.deps.storage.delete_job(id)).await {
            Ok(Ok(())) => warn!(job_id = %id, "publish failed, job record removed"),
            Ok(Err(e)) => error!(job_id = %id, error = %e, "publish failed and job record could not be removed"),
            Err(_) => error!(job_id = %id, "publish failed and removing the job record timed out"),
        }
    }

    fn stats_guard(&self) -> MutexGuard<'_, ServiceStats> {
        self.inner.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn decode_job_id(payload: &[u8]) -> Result<JobId, String> {
    let raw: String = serde_json::from_slice(payload).map_err(|e| e.to_string())?;
    raw.parse().map_err(|e: mediaflow_core::DomainError| e.to_string())
}
