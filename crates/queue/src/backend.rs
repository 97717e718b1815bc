//! Backend contract for leased message storage.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::QueueError;

/// A leased message.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Backend-assigned message id (row id, stream entry id, ...).
    pub id: String,
    pub job_type: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Identifies this particular lease; acks and releases with a stale token fail.
    pub lease_token: Uuid,
}

/// Durable storage for queue messages.
///
/// Implementations must guarantee that a leased message is not handed out
/// again until it is released or `lease_for` has elapsed.
#[async_trait::async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    async fn enqueue(&self, job_type: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Lease the next visible message for any of `job_types`, if one exists.
    async fn lease(
        &self,
        job_types: &[String],
        lease_for: Duration,
    ) -> Result<Option<Delivery>, QueueError>;

    /// Remove a successfully processed message.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Give up a lease; the message becomes visible again after `delay`.
    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError>;
}

#[async_trait::async_trait]
impl<B> QueueBackend for Arc<B>
where
    B: QueueBackend + ?Sized,
{
    async fn enqueue(&self, job_type: &str, payload: &[u8]) -> Result<(), QueueError> {
        (**self).enqueue(job_type, payload).await
    }

    async fn lease(
        &self,
        job_types: &[String],
        lease_for: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        (**self).lease(job_types, lease_for).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).ack(delivery).await
    }

    async fn release(&self, delivery: &Delivery, delay: Duration) -> Result<(), QueueError> {
        (**self).release(delivery, delay).await
    }
}
