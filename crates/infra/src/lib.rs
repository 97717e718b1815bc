//! Infrastructure layer: storage and queue backends, media adapters, config.

pub mod adapters;
pub mod config;
pub mod id3;
pub mod queue;
pub mod storage;

pub use adapters::{CompositeDownloader, FfmpegMediaProcessor, HttpDownloader, HttpUploader, UrlNotSupported};
pub use config::{AppConfig, BackendKind, ConfigError};
pub use queue::PostgresQueueBackend;
#[cfg(feature = "redis")]
pub use queue::RedisStreamsQueueBackend;
pub use storage::{InMemoryStorage, PostgresStorage};
#[cfg(feature = "redis")]
pub use storage::RedisStorage;
