//! Redis-backed storage: one JSON string key per record.
//!
//! Keys: `{prefix}:job:{id}` and `{prefix}:metadata:{url}`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use mediaflow_core::{Job, JobId, Metadata, Storage, StorageError};

#[derive(Clone)]
pub struct RedisStorage {
    connection: redis::aio::MultiplexedConnection,
    prefix: String,
}

impl RedisStorage {
    pub async fn connect(redis_url: impl AsRef<str>, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StorageError::backend(format!("redis connection error: {e}")))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StorageError::backend(format!("redis connection error: {e}")))?;
        Ok(Self {
            connection,
            prefix: prefix.into(),
        })
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn metadata_key(&self, url: &str) -> String {
        format!("{}:metadata:{}", self.prefix, url)
    }

    async fn get_document<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::backend(format!("GET failed: {e}")))?;
        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(StorageError::from)
    }

    async fn put_document<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::backend(format!("SET failed: {e}")))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for RedisStorage {
    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StorageError> {
        self.get_document(&self.job_key(id)).await
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn save_job(&self, job: &Job) -> Result<(), StorageError> {
        self.put_document(&self.job_key(&job.id), job).await
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.job_key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::backend(format!("DEL failed: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_metadata(&self, url: &str) -> Result<Option<Metadata>, StorageError> {
        self.get_document(&self.metadata_key(url)).await
    }

    #[instrument(skip(self, metadata), fields(url = %metadata.url), err)]
    async fn save_metadata(&self, metadata: &Metadata) -> Result<(), StorageError> {
        self.put_document(&self.metadata_key(&metadata.url), metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_core::testing::run_storage_contract;

    /// Connects to `REDIS_URL` under a fresh prefix; tests return early when it is unset.
    async fn storage() -> Option<RedisStorage> {
        let Ok(url) = std::env::var("REDIS_URL") else {
            eprintln!("REDIS_URL not set, skipping redis storage test");
            return None;
        };
        let prefix = format!("mediaflow-test-{}", uuid::Uuid::now_v7());
        Some(RedisStorage::connect(url, prefix).await.expect("connect"))
    }

    #[tokio::test]
    async fn satisfies_storage_contract() {
        let Some(storage) = storage().await else { return };
        run_storage_contract(&storage, "redis").await;
    }
}
