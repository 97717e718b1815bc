//! Recording fakes for service-level tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail};

use mediaflow_core::{
    Chapter, Downloader, Job, JobId, JobStatus, MediaInfo, MediaProcessor, Metadata, Storage, StorageError,
    Uploader, Variant,
};
use mediaflow_queue::{Handler, JobQueue, QueueError};
use mediaflow_service::{Collaborators, ServiceConfig};

pub const SOURCE_URL: &str = "magnet:?xt=urn:btih:fixture";
pub const RESULT_PATH: &str = "/out/result.mp3";

#[derive(Default)]
pub struct RecordingStorage {
    jobs: RwLock<HashMap<JobId, Job>>,
    metadata: RwLock<HashMap<String, Metadata>>,
    pub job_writes: AtomicUsize,
    pub job_deletes: AtomicUsize,
    pub statuses: Mutex<Vec<JobStatus>>,
    pub fail_job_saves: AtomicBool,
    pub fail_metadata_reads: AtomicBool,
}

impl RecordingStorage {
    pub fn job(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().unwrap().get(id).cloned()
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Storage for RecordingStorage {
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StorageError> {
        Ok(self.job(id))
    }

    async fn save_job(&self, job: &Job) -> Result<(), StorageError> {
        if self.fail_job_saves.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected save failure"));
        }
        self.job_writes.fetch_add(1, Ordering::SeqCst);
        self.statuses.lock().unwrap().push(job.status);
        self.jobs.write().unwrap().insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        self.job_deletes.fetch_add(1, Ordering::SeqCst);
        self.jobs.write().unwrap().remove(id);
        Ok(())
    }

    async fn get_metadata(&self, url: &str) -> Result<Option<Metadata>, StorageError> {
        if self.fail_metadata_reads.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected read failure"));
        }
        Ok(self.metadata.read().unwrap().get(url).cloned())
    }

    async fn save_metadata(&self, metadata: &Metadata) -> Result<(), StorageError> {
        self.metadata
            .write()
            .unwrap()
            .insert(metadata.url.clone(), metadata.clone());
        Ok(())
    }
}

/// Downloads "succeed" instantly into `/downloads/<variant>`.
#[derive(Default)]
pub struct FakeDownloader {
    pub downloads: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    /// Number of upcoming download calls that fail.
    pub failing_downloads: AtomicUsize,
    pub metadata_delay: Mutex<Duration>,
    pub download_delay: Mutex<Duration>,
}

pub fn downloaded_path(variant: &str) -> PathBuf {
    PathBuf::from("/downloads").join(variant)
}

#[async_trait::async_trait]
impl Downloader for FakeDownloader {
    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("magnet:") || url.starts_with("https://")
    }

    async fn get_metadata(&self, url: &str) -> anyhow::Result<Metadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.metadata_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(Metadata {
            url: url.to_string(),
            name: "fixture".to_string(),
            variants: vec![Variant::new("01.mp3").with_length(1), Variant::new("02.mp3")],
            allow_multiple_variants: true,
            downloader_name: "fake".to_string(),
        })
    }

    async fn download(&self, _url: &str, variants: &[String]) -> anyhow::Result<HashMap<String, PathBuf>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.download_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let failing = self.failing_downloads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_downloads.store(failing - 1, Ordering::SeqCst);
            bail!("swarm unavailable");
        }
        Ok(variants
            .iter()
            .map(|v| (v.clone(), downloaded_path(v)))
            .collect())
    }
}

/// Probe results are configured per path; unknown paths report 10s.
#[derive(Default)]
pub struct FakeProcessor {
    pub probes: Mutex<HashMap<PathBuf, Result<Duration, String>>>,
    pub concatenations: Mutex<Vec<(Vec<PathBuf>, String)>>,
    pub tagged: Mutex<Vec<Vec<Chapter>>>,
    pub fail_tagging: AtomicBool,
}

impl FakeProcessor {
    pub fn set_probe(&self, variant: &str, result: Result<Duration, &str>) {
        self.probes
            .lock()
            .unwrap()
            .insert(downloaded_path(variant), result.map_err(str::to_string));
    }

    pub fn tag_calls(&self) -> usize {
        self.tagged.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl MediaProcessor for FakeProcessor {
    async fn concatenate(&self, inputs: &[PathBuf], audio_codec: &str) -> anyhow::Result<PathBuf> {
        self.concatenations
            .lock()
            .unwrap()
            .push((inputs.to_vec(), audio_codec.to_string()));
        Ok(PathBuf::from(RESULT_PATH))
    }

    async fn get_info(&self, path: &Path) -> anyhow::Result<MediaInfo> {
        if path == Path::new(RESULT_PATH) {
            return Ok(MediaInfo {
                duration: Duration::from_secs(270),
                size_bytes: 4_320_000,
            });
        }
        let configured = self.probes.lock().unwrap().get(path).cloned();
        match configured.unwrap_or(Ok(Duration::from_secs(10))) {
            Ok(duration) => Ok(MediaInfo {
                duration,
                size_bytes: 1000,
            }),
            Err(reason) => Err(anyhow!(reason)),
        }
    }

    async fn add_chapter_tags(&self, _path: &Path, chapters: &[Chapter]) -> anyhow::Result<()> {
        self.tagged.lock().unwrap().push(chapters.to_vec());
        if self.fail_tagging.load(Ordering::SeqCst) {
            bail!("tag writer failed");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeUploader {
    pub uploads: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeUploader {
    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, path: &Path, url: &str) -> anyhow::Result<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((path.to_path_buf(), url.to_string()));
        Ok(())
    }
}

/// Queue that only records publishes.
#[derive(Default)]
pub struct RecordingQueue {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    /// Number of upcoming publish calls that fail.
    pub failing_publishes: AtomicUsize,
    pub handlers: Mutex<HashMap<String, Handler>>,
}

impl RecordingQueue {
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl JobQueue for RecordingQueue {
    async fn publish(&self, job_type: &str, payload: &[u8]) -> Result<(), QueueError> {
        let failing = self.failing_publishes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_publishes.store(failing - 1, Ordering::SeqCst);
            return Err(QueueError::backend("broker unreachable"));
        }
        self.published
            .lock()
            .unwrap()
            .push((job_type.to_string(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&self, job_type: &str, handler: Handler) -> Result<(), QueueError> {
        self.handlers.lock().unwrap().insert(job_type.to_string(), handler);
        Ok(())
    }

    fn run(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn shutdown(&self) {}
}

pub struct Fixture {
    pub storage: Arc<RecordingStorage>,
    pub downloader: Arc<FakeDownloader>,
    pub processor: Arc<FakeProcessor>,
    pub uploader: Arc<FakeUploader>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RecordingStorage::default()),
            downloader: Arc::new(FakeDownloader::default()),
            processor: Arc::new(FakeProcessor::default()),
            uploader: Arc::new(FakeUploader::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.storage.clone(),
            self.downloader.clone(),
            self.processor.clone(),
            self.uploader.clone(),
        )
        .with_config(ServiceConfig::default())
    }
}
