//! Concatenate flow: download several variants, join them into one file
//! with a chapter per input, upload the result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use mediaflow_core::media::contiguous_chapters;
use mediaflow_core::{Chapter, DomainError, DomainResult, Job, JobId, JobStatus};

use super::{Collaborators, Progress, parse_params, within};
use crate::error::{FlowError, Stage};

const DEFAULT_AUDIO_CODEC: &str = "copy";

/// Params of a `concatenate` job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcatenateParams {
    /// Variant ids in output order.
    #[serde(alias = "filepaths")]
    pub variants: Vec<String>,
    #[serde(default)]
    pub audio_codec: String,
    pub upload_url: String,
}

impl ConcatenateParams {
    pub fn from_job(job: &Job) -> DomainResult<Self> {
        let mut params: Self = parse_params(job)?;
        if params.audio_codec.trim().is_empty() {
            params.audio_codec = DEFAULT_AUDIO_CODEC.to_string();
        }
        Ok(params)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConcatenateFlow {
    job_id: JobId,
    params: ConcatenateParams,
}

impl ConcatenateFlow {
    pub fn new(job_id: JobId, params: ConcatenateParams) -> DomainResult<Self> {
        if params.variants.is_empty() {
            return Err(DomainError::validation("concatenate requires at least one variant"));
        }
        if params.variants.iter().any(|v| v.trim().is_empty()) {
            return Err(DomainError::validation("concatenate variants must not be empty"));
        }
        if params.upload_url.trim().is_empty() {
            return Err(DomainError::validation("concatenate requires uploadUrl"));
        }
        Ok(Self { job_id, params })
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn params(&self) -> &ConcatenateParams {
        &self.params
    }

    pub async fn execute(&self, deps: &Collaborators) -> Result<(), FlowError> {
        let config = &deps.config;
        let mut progress = Progress::load(&self.job_id, deps).await?;
        let url = progress.job().url().to_string();

        progress.set_status(JobStatus::Downloading).await;
        debug!(job_id = %self.job_id, variants = self.params.variants.len(), "starting download");
        let downloaded = within(
            Stage::Download,
            config.download_timeout,
            deps.downloader.download(&url, &self.params.variants),
        )
        .await?;
        let inputs = self.ordered_paths(&downloaded)?;

        let result = match inputs.as_slice() {
            [single] => single.clone(),
            _ => {
                progress.set_status(JobStatus::Processing).await;
                let chapters = self.build_chapters(deps, &inputs).await;

                debug!(job_id = %self.job_id, codec = %self.params.audio_codec, "starting concatenation");
                let output = within(
                    Stage::Concatenate,
                    config.concatenate_timeout,
                    deps.processor.concatenate(&inputs, &self.params.audio_codec),
                )
                .await?;

                if let Some(chapters) = chapters {
                    self.tag_chapters(deps, &output, &chapters).await;
                }
                output
            }
        };

        let info = within(Stage::Probe, config.probe_timeout, deps.processor.get_info(&result)).await?;
        debug!(
            job_id = %self.job_id,
            duration_ms = info.duration.as_millis() as u64,
            size_bytes = info.size_bytes,
            "probed result file"
        );
        progress.record_result(info);

        progress.set_status(JobStatus::Uploading).await;
        debug!(job_id = %self.job_id, path = %result.display(), "starting upload");
        within(
            Stage::Upload,
            config.upload_timeout,
            deps.uploader.upload(&result, &self.params.upload_url),
        )
        .await?;

        progress.set_status(JobStatus::Complete).await;
        info!(job_id = %self.job_id, "job complete");
        Ok(())
    }

    /// Downloaded paths in submission order.
    fn ordered_paths(&self, downloaded: &HashMap<String, PathBuf>) -> Result<Vec<PathBuf>, FlowError> {
        self.params
            .variants
            .iter()
            .map(|variant| {
                downloaded
                    .get(variant)
                    .cloned()
                    .ok_or_else(|| FlowError::MissingVariant(variant.clone()))
            })
            .collect()
    }

    /// One chapter per input, back to back. `None` if any input cannot be
    /// probed or reports no duration; chapters are then skipped entirely.
    async fn build_chapters(&self, deps: &Collaborators, inputs: &[PathBuf]) -> Option<Vec<Chapter>> {
        let mut parts = Vec::with_capacity(inputs.len());
        for (variant, path) in self.params.variants.iter().zip(inputs) {
            let info = match within(Stage::Probe, deps.config.probe_timeout, deps.processor.get_info(path)).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(
                        job_id = %self.job_id,
                        variant = %variant,
                        error = %e,
                        "failed to probe input, skipping chapters"
                    );
                    return None;
                }
            };
            if info.duration.is_zero() {
                warn!(job_id = %self.job_id, variant = %variant, "input has no duration, skipping chapters");
                return None;
            }
            parts.push((chapter_title(variant), info.duration));
        }

        let Some(chapters) = contiguous_chapters(parts) else {
            warn!(job_id = %self.job_id, "total input duration overflows, skipping chapters");
            return None;
        };
        (!chapters.is_empty()).then_some(chapters)
    }

    async fn tag_chapters(&self, deps: &Collaborators, output: &Path, chapters: &[Chapter]) {
        match within(
            Stage::Tag,
            deps.config.tag_timeout,
            deps.processor.add_chapter_tags(output, chapters),
        )
        .await
        {
            Ok(()) => debug!(job_id = %self.job_id, chapters = chapters.len(), "chapter tags written"),
            Err(e) => warn!(job_id = %self.job_id, error = %e, "failed to write chapter tags, proceeding"),
        }
    }
}

/// Variant file name without directory or extension.
fn chapter_title(variant: &str) -> String {
    Path::new(variant)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| variant.to_string())
}
