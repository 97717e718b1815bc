//! Tracing/logging initialization.
//!
//! Production output is JSON with timestamps. Debug runs get the
//! human-readable formatter with a `debug` default filter. Either way
//! `RUST_LOG` overrides the filter.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// `Pretty` when debugging, `Json` otherwise.
    pub fn for_debug(debug: bool) -> Self {
        if debug { Self::Pretty } else { Self::Json }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Self::Json => "info",
            Self::Pretty => "debug",
        }
    }
}

fn filter(format: LogFormat) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format.default_filter()))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(format))
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let _ = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.with_target(true).try_init(),
    };
}
