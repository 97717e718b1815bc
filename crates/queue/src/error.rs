//! Queue error model.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The backend (database, stream store) failed.
    #[error("queue backend error: {0}")]
    Backend(String),

    /// A job type tag was empty or otherwise unusable as a channel name.
    #[error("invalid job type: {0:?}")]
    InvalidJobType(String),

    /// The lease on a delivery expired and the message was handed to someone else.
    #[error("lease lost for message {0}")]
    LeaseLost(String),

    #[error("queue is already running")]
    AlreadyRunning,

    #[error("queue has been shut down")]
    ShutDown,
}

impl QueueError {
    pub fn backend(msg: impl core::fmt::Display) -> Self {
        Self::Backend(msg.to_string())
    }
}
