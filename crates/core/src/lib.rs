//! `mediaflow-core`: domain foundation building blocks.
//!
//! This crate contains the **pure domain** model of media jobs (no IO) plus
//! the capability boundaries (ports) that infrastructure adapters implement.

pub mod error;
pub mod id;
pub mod job;
pub mod media;
pub mod metadata;
pub mod ports;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Job, JobKind, JobParams, JobStatus};
pub use media::{Chapter, MediaInfo};
pub use metadata::{Metadata, Variant};
pub use ports::{Downloader, MediaProcessor, Storage, StorageError, Uploader};
