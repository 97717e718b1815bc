//! Postgres-backed queue backend (leased rows).
//!
//! A message is a row in `mediaflow_queue`. Leasing moves its `visible_at`
//! into the future and stamps a fresh `lease_token`, inside a single
//! `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED)` so concurrent
//! consumers never lease the same row. A row whose lease runs out becomes
//! visible again and is redelivered.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use mediaflow_queue::{Delivery, QueueBackend, QueueError};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS mediaflow_queue (
        id BIGSERIAL PRIMARY KEY,
        job_type TEXT NOT NULL,
        payload BYTEA NOT NULL,
        visible_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        attempts INTEGER NOT NULL DEFAULT 0,
        lease_token UUID,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS mediaflow_queue_visible_idx
        ON mediaflow_queue (job_type, visible_at)",
];

#[derive(Debug, Clone)]
pub struct PostgresQueueBackend {
    pool: Arc<PgPool>,
}

impl PostgresQueueBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create the queue table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), QueueError> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }
}

fn row_id(delivery: &Delivery) -> Result<i64, QueueError> {
    delivery
        .id
        .parse()
        .map_err(|_| QueueError::backend(format!("malformed message id: {}", delivery.id)))
}

#[async_trait::async_trait]
impl QueueBackend for PostgresQueueBackend {
    #[instrument(skip(self, payload), fields(payload_len = payload.len()), err)]
    async fn enqueue(&self, job_type: &str, payload: &[u8]) -> Result<(), QueueError> {
        sqlx::query("INSERT INTO mediaflow_queue (job_type, payload) VALUES ($1, $2)")
            .bind(job_type)
            .bind(payload)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("enqueue", e))?;
        Ok(())
    }

    async fn lease(
        &self,
        job_types: &[String],
        lease_for: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let token = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            UPDATE mediaflow_queue
            SET visible_at = now() + make_interval(secs => $2),
                attempts = attempts + 1,
                lease_token = $3
            WHERE id = (
                SELECT id FROM mediaflow_queue
                WHERE job_type = ANY($1) AND visible_at <= now()
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, job_type, payload, attempts, created_at
            "#,
        )
        .bind(job_types)
        .bind(lease_for.as_secs_f64())
        .bind(token)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("lease", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.try_get("id").map_err(|e| map_sqlx_error("lease", e))?;
        let attempts: i32 = row.try_get("attempts").map_err(|e| map_sqlx_error("lease", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("lease", e))?;

        Ok(Some(Delivery {
            id: id.to_string(),
            job_type: row.try_get("job_type").map_err(|e| map_sqlx_error("lease", e))?,
            payload: row.try_get("payload").map_err(|e| map_sqlx_error("lease", e))?,
            attempt: u32::try_from(attempts).unwrap_or(0),
            enqueued_at: created_at,
            lease_token: token,
        }))
    }

    #[instrument(skip(self, delivery), fields(message_id = %delivery.id), err)]
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM mediaflow_queue WHERE id = $1 AND lease_token = $2")
            .bind(row_id(delivery)?)
            .bind(delivery.lease_token)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ack", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(delivery.id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self, delivery), fields(message_id = %delivery.id, delay_ms = delay.as_millis() as u64), err)]
    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE mediaflow_queue
            SET visible_at = now() + make_interval(secs => $3), lease_token = NULL
            WHERE id = $1 AND lease_token = $2
            "#,
        )
        .bind(row_id(delivery)?)
        .bind(delivery.lease_token)
        .bind(delay.as_secs_f64())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release", e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(delivery.id.clone()));
        }
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::Database(db_err) => {
            QueueError::backend(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => QueueError::backend(format!("connection pool closed in {}", operation)),
        _ => QueueError::backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
