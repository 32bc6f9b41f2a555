//! Structured logging for anon-core.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for supervised service runs
//!
//! # Usage
//!
//! ```ignore
//! use anon_core::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env(None, None);
//! init_logging(&config);
//! tracing::info!(run_id = %anon_core::logging::generate_run_id(), "starting");
//! ```
//!
//! # Design Notes
//!
//! - stdout is reserved for anonymized output and command payloads
//! - stderr receives all log output (human or JSONL)
//! - Log events never carry raw field values, only policy names and counts

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events are emitted.
const LOG_TARGETS: &[&str] = &["anon_core", "anon_redact"];

/// Build the event filter for a resolved level.
pub fn build_filter(level: LogLevel) -> EnvFilter {
    let directives = LOG_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(directives)
}

/// Initialize the logging subsystem.
///
/// Call once at startup before any logging occurs. Returns `false` when a
/// global subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = build_filter(config.level);

    let installed = match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => {
            let json_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .try_init()
        }
    };

    installed.is_ok()
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    // First 12 hex chars are enough for correlation
    format!("run-{}", &uuid.simple().to_string()[..12])
}
