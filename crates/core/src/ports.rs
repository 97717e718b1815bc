//! Capability boundaries implemented by infrastructure adapters.
//!
//! Every port is an async trait object-safe enough to be held as
//! `Arc<dyn Port>`. Deadlines are not part of the signatures: callers wrap
//! each call in `tokio::time::timeout`, and adapters are expected to release
//! their resources when the returned future is dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::id::JobId;
use crate::job::Job;
use crate::media::{Chapter, MediaInfo};
use crate::metadata::Metadata;

/// Storage failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn backend(msg: impl core::fmt::Display) -> Self {
        Self::Backend(msg.to_string())
    }
}

/// Keyed persistence for jobs and source metadata.
///
/// A missing record is `Ok(None)`, never an error.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StorageError>;

    /// Insert or overwrite the job stored under `job.id`.
    async fn save_job(&self, job: &Job) -> Result<(), StorageError>;

    /// Remove the job stored under `id`. Removing a missing job is not an error.
    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError>;

    async fn get_metadata(&self, url: &str) -> Result<Option<Metadata>, StorageError>;

    /// Insert or overwrite the metadata stored under `metadata.url`.
    async fn save_metadata(&self, metadata: &Metadata) -> Result<(), StorageError>;
}

#[async_trait::async_trait]
impl<S> Storage for Arc<S>
where
    S: Storage + ?Sized,
{
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StorageError> {
        (**self).get_job(id).await
    }

    async fn save_job(&self, job: &Job) -> Result<(), StorageError> {
        (**self).save_job(job).await
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        (**self).delete_job(id).await
    }

    async fn get_metadata(&self, url: &str) -> Result<Option<Metadata>, StorageError> {
        (**self).get_metadata(url).await
    }

    async fn save_metadata(&self, metadata: &Metadata) -> Result<(), StorageError> {
        (**self).save_metadata(metadata).await
    }
}

/// Fetches sources.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Whether this downloader can handle `url` at all. Must not do IO.
    fn accepts_url(&self, url: &str) -> bool;

    async fn get_metadata(&self, url: &str) -> anyhow::Result<Metadata>;

    /// Download the selected variants, returning the local path of each.
    ///
    /// The returned map is keyed by variant id.
    async fn download(&self, url: &str, variants: &[String]) -> anyhow::Result<HashMap<String, PathBuf>>;
}

/// Local media processing.
#[async_trait::async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Join `inputs` in order into a new file and return its path.
    async fn concatenate(&self, inputs: &[PathBuf], audio_codec: &str) -> anyhow::Result<PathBuf>;

    async fn get_info(&self, path: &Path) -> anyhow::Result<MediaInfo>;

    /// Replace the chapter tags of `path` with `chapters`.
    async fn add_chapter_tags(&self, path: &Path, chapters: &[Chapter]) -> anyhow::Result<()>;
}

/// Publishes a local file to a destination URL.
#[async_trait::async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, path: &Path, url: &str) -> anyhow::Result<()>;
}
