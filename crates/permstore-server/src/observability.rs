//! Logging setup and metric names.
//!
//! Logs go through `tracing`; `init_logging` installs a global
//! `tracing-subscriber` registry writing either JSON (production) or
//! pretty text (development). `RUST_LOG` overrides the configured level.
//!
//! ```ignore
//! use permstore_server::observability::{init_logging, LoggingConfig};
//!
//! init_logging(LoggingConfig::from(&config.logging));
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use permstore_storage::{STORE_READ_DURATION, STORE_TIMEOUTS};

use crate::config::LoggingSettings;

pub const UNRESTRICTED_CACHE_HITS: &str = "permstore_unrestricted_cache_hits_total";
pub const UNRESTRICTED_CACHE_MISSES: &str = "permstore_unrestricted_cache_misses_total";
pub const UNRESTRICTED_FALLBACKS: &str = "permstore_unrestricted_fallback_total";
pub const WRITE_FAILURES: &str = "permstore_write_failures_total";
pub const READ_FAILURES: &str = "permstore_read_failures_total";

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// JSON (true) or pretty text (false)
    pub json_format: bool,
    /// Level used when RUST_LOG is not set
    pub default_level: Level,
    /// Emit span enter/exit events
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    pub fn json() -> Self {
        Self {
            json_format: true,
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.include_spans = true;
        self
    }
}

impl From<&LoggingSettings> for LoggingConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            json_format: settings.json,
            // Validated config only holds known levels.
            default_level: Level::from_str(&settings.level).unwrap_or(Level::INFO),
            include_spans: false,
        }
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_logging(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    let span_events = if config.include_spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_target(true),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// A JSON subscriber writing to `writer`, for capturing logs in tests.
pub fn create_json_layer<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}

const COUNTER_DESCRIPTIONS: &[(&str, &str)] = &[
    (
        UNRESTRICTED_CACHE_HITS,
        "Unrestricted permission lookups served from the cache",
    ),
    (
        UNRESTRICTED_CACHE_MISSES,
        "Unrestricted permission lookups that loaded from the store",
    ),
    (
        UNRESTRICTED_FALLBACKS,
        "Stale unrestricted permissions served after a failed refresh",
    ),
    (WRITE_FAILURES, "Failed permission writes and removals"),
    (READ_FAILURES, "Failed permission reads"),
    (STORE_TIMEOUTS, "Store reads abandoned at their deadline"),
];

/// Registers descriptions for the repository's metrics.
pub fn register_metrics() {
    for (name, description) in COUNTER_DESCRIPTIONS {
        metrics::describe_counter!(*name, *description);
    }
    metrics::describe_histogram!(
        STORE_READ_DURATION,
        metrics::Unit::Seconds,
        "Store read latency by outcome"
    );
}
