//! `mediaflow-queue`: durable, at-least-once job queue.
//!
//! ## Design
//!
//! - `JobQueue` is the contract callers see: publish, subscribe, run, shutdown
//! - `QueueBackend` is the storage contract: enqueue, lease, ack, release
//! - `LeasedQueue` turns any backend into a `JobQueue` with bounded
//!   concurrency, per-message execution deadlines and redelivery on failure
//!
//! A leased message is invisible to other consumers until it is acked,
//! released, or its lease runs out. Redelivery is the only retry mechanism.

pub mod backend;
pub mod error;
pub mod handler;
pub mod leased;
pub mod memory;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{Delivery, QueueBackend};
pub use error::QueueError;
pub use handler::{Handler, handler_fn};
pub use leased::{LeasedQueue, QueueConfig, QueueStats};
pub use memory::InMemoryQueueBackend;

use std::sync::Arc;

/// Publish/subscribe job queue with at-least-once delivery.
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    /// Durably enqueue `payload` on the `job_type` channel.
    async fn publish(&self, job_type: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Register the handler for `job_type`, replacing any previous one.
    fn subscribe(&self, job_type: &str, handler: Handler) -> Result<(), QueueError>;

    /// Start consuming. Must be called from within a tokio runtime.
    fn run(&self) -> Result<(), QueueError>;

    /// Stop leasing new messages and wait for in-flight handlers to finish.
    ///
    /// Idempotent.
    async fn shutdown(&self);
}

#[async_trait::async_trait]
impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    async fn publish(&self, job_type: &str, payload: &[u8]) -> Result<(), QueueError> {
        (**self).publish(job_type, payload).await
    }

    fn subscribe(&self, job_type: &str, handler: Handler) -> Result<(), QueueError> {
        (**self).subscribe(job_type, handler)
    }

    fn run(&self) -> Result<(), QueueError> {
        (**self).run()
    }

    async fn shutdown(&self) {
        (**self).shutdown().await
    }
}
