//! Structured logging for the abrigo server.
//!
//! JSON to stdout, filtered by `RUST_LOG` or the configured level, plus an
//! optional SQLite sink that keeps warn+ records tagged with the `user_id`
//! and `conversation_id` of the enclosing span.

mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG.
    pub log_level: Level,
    /// Per-module overrides (e.g. "abrigo_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
    /// Persisted records older than this are pruned at startup.
    pub log_retention_days: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_to_sqlite: true,
            log_db_path: home_dir().join("logs.db"),
            log_retention_days: 14,
        }
    }
}

/// Keeps the log sink alive for the life of the process.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// Access the log sink for querying persisted logs.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

fn filter_directive(config: &TelemetryConfig) -> String {
    let mut directive = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        directive.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directive
}

/// Initialize tracing. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let (sqlite_layer, sqlite_sink) = if config.log_to_sqlite {
        match SqliteLogSink::new(&config.log_db_path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(SqliteLogLayer::new(sink.clone())), Some(sink))
            }
            Err(e) => {
                eprintln!("abrigo-telemetry: failed to open log DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sqlite_layer)
        .init();

    if let Some(sink) = &sqlite_sink {
        match sink.prune(config.log_retention_days) {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "pruned old log records"),
            Err(e) => tracing::warn!(error = %e, "log pruning failed"),
        }
    }

    TelemetryGuard {
        log_sink: sqlite_sink,
    }
}

/// `~/.abrigo`, or `/tmp/.abrigo` when HOME is unset.
pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".abrigo")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_includes_module_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("abrigo_engine".into(), Level::DEBUG)],
            ..Default::default()
        };
        assert_eq!(filter_directive(&config), "warn,abrigo_engine=debug");
    }

    #[test]
    fn default_paths_live_under_home() {
        let config = TelemetryConfig::default();
        assert!(config.log_db_path.ends_with(".abrigo/logs.db"));
        assert_eq!(config.log_level, Level::INFO);
    }
}
