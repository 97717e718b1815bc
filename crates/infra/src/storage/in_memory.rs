//! In-memory storage for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mediaflow_core::{Job, JobId, Metadata, Storage, StorageError};

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    jobs: RwLock<HashMap<JobId, Job>>,
    metadata: RwLock<HashMap<String, Metadata>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn job_count(&self) -> usize {
        read(&self.jobs).len()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl Storage for InMemoryStorage {
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StorageError> {
        Ok(read(&self.jobs).get(id).cloned())
    }

    async fn save_job(&self, job: &Job) -> Result<(), StorageError> {
        write(&self.jobs).insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        write(&self.jobs).remove(id);
        Ok(())
    }

    async fn get_metadata(&self, url: &str) -> Result<Option<Metadata>, StorageError> {
        Ok(read(&self.metadata).get(url).cloned())
    }

    async fn save_metadata(&self, metadata: &Metadata) -> Result<(), StorageError> {
        write(&self.metadata).insert(metadata.url.clone(), metadata.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_core::testing::run_storage_contract;
    use mediaflow_core::{JobParams, JobStatus, Variant};

    #[tokio::test]
    async fn satisfies_storage_contract() {
        run_storage_contract(&InMemoryStorage::new(), "in-memory").await;
    }

    #[tokio::test]
    async fn shared_handle_sees_the_same_records() {
        let storage = InMemoryStorage::arc();
        run_storage_contract(&storage, "shared").await;
        assert_eq!(storage.job_count(), 1);
    }

    #[tokio::test]
    async fn save_overwrites_and_missing_is_none() {
        let storage = InMemoryStorage::new();
        let mut job = Job::new(JobParams::new("https://x/a", "concatenate", serde_json::json!({})));

        assert_eq!(storage.get_job(&job.id).await.unwrap(), None);
        storage.save_job(&job).await.unwrap();
        job.status = JobStatus::Uploading;
        storage.save_job(&job).await.unwrap();

        assert_eq!(storage.job_count(), 1);
        assert_eq!(storage.get_job(&job.id).await.unwrap().unwrap().status, JobStatus::Uploading);
    }

    #[tokio::test]
    async fn metadata_is_keyed_by_url() {
        let storage = InMemoryStorage::new();
        let metadata = Metadata {
            url: "https://x/a".to_string(),
            name: "a".to_string(),
            variants: vec![Variant::new("a.mp3")],
            allow_multiple_variants: false,
            downloader_name: "http".to_string(),
        };
        storage.save_metadata(&metadata).await.unwrap();
        assert_eq!(storage.get_metadata("https://x/a").await.unwrap(), Some(metadata));
        assert_eq!(storage.get_metadata("https://x/b").await.unwrap(), None);
    }
}
