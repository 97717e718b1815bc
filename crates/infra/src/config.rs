//! Process configuration loaded from the environment (and `.env`).
//!
//! | variable                      | default                     |
//! |-------------------------------|-----------------------------|
//! | `BIND_ADDR`                   | `0.0.0.0:8080`              |
//! | `DEBUG`                       | off                         |
//! | `STORAGE_BACKEND`             | `memory`                    |
//! | `QUEUE_BACKEND`               | `memory`                    |
//! | `DATABASE_URL`                | required for `postgres`     |
//! | `REDIS_URL`                   | required for `redis`        |
//! | `REDIS_KEY_PREFIX`            | `mediaflow`                 |
//! | `QUEUE_CONCURRENCY`           | `4`                         |
//! | `QUEUE_POLL_INTERVAL_MS`      | `1000`                      |
//! | `QUEUE_MAX_EXECUTION_SECS`    | `28800`                     |
//! | `QUEUE_REDELIVERY_DELAY_SECS` | `30`                        |
//! | `QUEUE_CANCEL_GRACE_MS`       | `5000`                      |
//! | `DOWNLOAD_DIR`                | system temp dir             |
//! | `METADATA_TIMEOUT_SECS`       | `1800`                      |
//! | `METADATA_WAIT_MS`            | `100`                       |

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mediaflow_queue::QueueConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} must be set when {needed_by}")]
    Missing {
        key: &'static str,
        needed_by: String,
    },
}

/// Where job records, cached metadata or queue messages live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Memory,
    Postgres,
    Redis,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown backend {other:?}, expected memory, postgres or redis")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
            Self::Redis => "redis",
        })
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Human-readable debug logs instead of JSON.
    pub debug: bool,
    pub storage_backend: BackendKind,
    pub queue_backend: BackendKind,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub queue: QueueConfig,
    pub download_dir: PathBuf,
    /// Deadline for a whole metadata lookup.
    pub metadata_timeout: Duration,
    /// How long an HTTP caller waits for metadata before getting "accepted".
    pub metadata_wait: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            debug: false,
            storage_backend: BackendKind::Memory,
            queue_backend: BackendKind::Memory,
            database_url: None,
            redis_url: None,
            redis_key_prefix: "mediaflow".to_string(),
            queue: QueueConfig::default(),
            download_dir: std::env::temp_dir().join("mediaflow"),
            metadata_timeout: Duration::from_secs(30 * 60),
            metadata_wait: Duration::from_millis(100),
        }
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let storage_backend = parsed(&get, "STORAGE_BACKEND")?.unwrap_or(defaults.storage_backend);
        let queue_backend = parsed(&get, "QUEUE_BACKEND")?.unwrap_or(defaults.queue_backend);
        let database_url = get("DATABASE_URL");
        let redis_url = get("REDIS_URL");

        for (kind, role) in [(storage_backend, "STORAGE_BACKEND"), (queue_backend, "QUEUE_BACKEND")] {
            match kind {
                BackendKind::Postgres if database_url.is_none() => {
                    return Err(ConfigError::Missing {
                        key: "DATABASE_URL",
                        needed_by: format!("{role}={kind}"),
                    });
                }
                BackendKind::Redis if redis_url.is_none() => {
                    return Err(ConfigError::Missing {
                        key: "REDIS_URL",
                        needed_by: format!("{role}={kind}"),
                    });
                }
                _ => {}
            }
        }

        let concurrency: usize = parsed(&get, "QUEUE_CONCURRENCY")?.unwrap_or(defaults.queue.concurrency);
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let mut queue = defaults.queue.clone().with_concurrency(concurrency);
        if let Some(ms) = parsed::<u64>(&get, "QUEUE_POLL_INTERVAL_MS")? {
            queue = queue.with_poll_interval(Duration::from_millis(ms));
        }
        if let Some(secs) = parsed::<u64>(&get, "QUEUE_MAX_EXECUTION_SECS")? {
            queue = queue.with_max_execution_time(Duration::from_secs(secs));
        }
        if let Some(secs) = parsed::<u64>(&get, "QUEUE_REDELIVERY_DELAY_SECS")? {
            queue = queue.with_redelivery_delay(Duration::from_secs(secs));
        }
        if let Some(ms) = parsed::<u64>(&get, "QUEUE_CANCEL_GRACE_MS")? {
            queue = queue.with_cancel_grace(Duration::from_millis(ms));
        }

        Ok(Self {
            bind_addr: parsed(&get, "BIND_ADDR")?.unwrap_or(defaults.bind_addr),
            debug: get("DEBUG").is_some_and(|v| is_truthy(&v)),
            storage_backend,
            queue_backend,
            database_url,
            redis_url,
            redis_key_prefix: get("REDIS_KEY_PREFIX").unwrap_or(defaults.redis_key_prefix),
            queue,
            download_dir: get("DOWNLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.download_dir),
            metadata_timeout: parsed(&get, "METADATA_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.metadata_timeout),
            metadata_wait: parsed(&get, "METADATA_WAIT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.metadata_wait),
        })
    }
}

/// Any non-empty value except `0` and `false` turns a flag on.
fn is_truthy(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    get(key)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
