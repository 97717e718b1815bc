//! `mediaflow-service`: job orchestration.
//!
//! - `JobService`: deterministic job identity, validated idempotent
//!   submission, and the queue handler that runs flows
//! - `Flow`: per-job-kind stage pipelines with per-stage deadlines
//! - `KeyedExecutor`: per-key serialized execution used to collapse
//!   concurrent metadata lookups for the same URL

pub mod config;
pub mod dedup;
pub mod error;
pub mod flows;
pub mod service;

pub use config::ServiceConfig;
pub use dedup::KeyedExecutor;
pub use error::{DedupError, FlowError, ServiceError, Stage};
pub use flows::{Collaborators, ConcatenateFlow, ConcatenateParams, Flow, UploadOriginalFlow, UploadOriginalParams};
pub use service::{JobService, PROCESS_JOB_TYPE, ServiceStats, Submission};
