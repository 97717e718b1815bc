//! Durable `QueueBackend`s driven by `mediaflow_queue::LeasedQueue`.

mod postgres;
#[cfg(feature = "redis")]
mod redis_streams;

pub use postgres::PostgresQueueBackend;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueueBackend;
