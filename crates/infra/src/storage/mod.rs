//! `Storage` implementations for jobs and cached source metadata.

mod in_memory;
mod postgres;
#[cfg(feature = "redis")]
mod redis_store;

pub use in_memory::InMemoryStorage;
pub use postgres::PostgresStorage;
#[cfg(feature = "redis")]
pub use redis_store::RedisStorage;
