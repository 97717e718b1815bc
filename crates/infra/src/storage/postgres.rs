//! Postgres-backed storage.
//!
//! Jobs and metadata are stored as JSONB documents keyed by job id and
//! source URL. Saves are upserts, so re-running a flow stage simply
//! overwrites the previous record.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Row};
use tracing::instrument;

use mediaflow_core::{Job, JobId, Metadata, Storage, StorageError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS mediaflow_jobs (
        id TEXT PRIMARY KEY,
        data JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS mediaflow_metadata (
        url TEXT PRIMARY KEY,
        data JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
];

#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create the tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    async fn get_document<T: DeserializeOwned>(
        &self,
        operation: &str,
        sql: &str,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let row = sqlx::query(sql)
            .bind(key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        match row {
            Some(row) => {
                let data: serde_json::Value = row
                    .try_get("data")
                    .map_err(|e| map_sqlx_error(operation, e))?;
                Ok(Some(serde_json::from_value(data)?))
            }
            None => Ok(None),
        }
    }

    async fn put_document<T: Serialize>(
        &self,
        operation: &str,
        sql: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let data = serde_json::to_value(value)?;
        sqlx::query(sql)
            .bind(key)
            .bind(data)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for PostgresStorage {
    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StorageError> {
        self.get_document(
            "get_job",
            "SELECT data FROM mediaflow_jobs WHERE id = $1",
            id.as_str(),
        )
        .await
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status), err)]
    async fn save_job(&self, job: &Job) -> Result<(), StorageError> {
        self.put_document(
            "save_job",
            r#"
            INSERT INTO mediaflow_jobs (id, data) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()
            "#,
            job.id.as_str(),
            job,
        )
        .await
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn delete_job(&self, id: &JobId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM mediaflow_jobs WHERE id = $1")
            .bind(id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_metadata(&self, url: &str) -> Result<Option<Metadata>, StorageError> {
        self.get_document(
            "get_metadata",
            "SELECT data FROM mediaflow_metadata WHERE url = $1",
            url,
        )
        .await
    }

    #[instrument(skip(self, metadata), fields(url = %metadata.url), err)]
    async fn save_metadata(&self, metadata: &Metadata) -> Result<(), StorageError> {
        self.put_document(
            "save_metadata",
            r#"
            INSERT INTO mediaflow_metadata (url, data) VALUES ($1, $2)
            ON CONFLICT (url) DO UPDATE SET data = EXCLUDED.data, updated_at = now()
            "#,
            &metadata.url,
            metadata,
        )
        .await
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => {
            StorageError::backend(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => StorageError::backend(format!("connection pool closed in {}", operation)),
        _ => StorageError::backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
