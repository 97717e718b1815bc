//! Upload-original flow: download a single variant and upload it untouched.

use serde::Deserialize;
use tracing::{debug, info};

use mediaflow_core::{DomainError, DomainResult, Job, JobId, JobStatus};

use super::{Collaborators, Progress, parse_params, within};
use crate::error::{FlowError, Stage};

/// Params of an `upload_original` job.
///
/// The variant may be given as `variant` or as a one-element `variants` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOriginalParams {
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default, alias = "filepaths")]
    pub variants: Vec<String>,
    pub upload_url: String,
}

impl UploadOriginalParams {
    pub fn from_job(job: &Job) -> DomainResult<Self> {
        parse_params(job)
    }

    /// The single selected variant, if exactly one was given.
    fn selected(&self) -> DomainResult<&str> {
        let mut selected: Vec<&str> = self
            .variant
            .iter()
            .chain(self.variants.iter())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
            .collect();
        selected.dedup();
        match selected.as_slice() {
            [one] => Ok(*one),
            [] => Err(DomainError::validation("upload_original requires a variant")),
            _ => Err(DomainError::validation(format!(
                "upload_original takes exactly one variant, got {}",
                selected.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOriginalFlow {
    job_id: JobId,
    variant: String,
    upload_url: String,
}

impl UploadOriginalFlow {
    pub fn new(job_id: JobId, params: UploadOriginalParams) -> DomainResult<Self> {
        let variant = params.selected()?.to_string();
        if params.upload_url.trim().is_empty() {
            return Err(DomainError::validation("upload_original requires uploadUrl"));
        }
        Ok(Self {
            job_id,
            variant,
            upload_url: params.upload_url,
        })
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub async fn execute(&self, deps: &Collaborators) -> Result<(), FlowError> {
        let config = &deps.config;
        let mut progress = Progress::load(&self.job_id, deps).await?;
        let url = progress.job().url().to_string();

        progress.set_status(JobStatus::Downloading).await;
        debug!(job_id = %self.job_id, variant = %self.variant, "starting download");
        let mut downloaded = within(
            Stage::Download,
            config.download_timeout,
            deps.downloader.download(&url, std::slice::from_ref(&self.variant)),
        )
        .await?;
        let path = downloaded
            .remove(&self.variant)
            .ok_or_else(|| FlowError::MissingVariant(self.variant.clone()))?;
        debug!(job_id = %self.job_id, path = %path.display(), "downloaded file");

        let info = within(Stage::Probe, config.probe_timeout, deps.processor.get_info(&path)).await?;
        progress.record_result(info);

        progress.set_status(JobStatus::Uploading).await;
        debug!(job_id = %self.job_id, "starting upload");
        within(
            Stage::Upload,
            config.upload_timeout,
            deps.uploader.upload(&path, &self.upload_url),
        )
        .await?;

        progress.set_status(JobStatus::Complete).await;
        info!(job_id = %self.job_id, "job complete");
        Ok(())
    }
}
