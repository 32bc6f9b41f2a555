//! Logging configuration.
//!
//! Resolved from, highest priority first: CLI flags (`-v`/`-q`,
//! `--log-format`), `ANON_LOG`, `RUST_LOG`, `ANON_LOG_FORMAT`, defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Variable naming the level for anon-core alone.
pub const LOG_LEVEL_ENV: &str = "ANON_LOG";

/// Variable naming the log format.
pub const LOG_FORMAT_ENV: &str = "ANON_LOG_FORMAT";

/// How log events are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Console lines for an operator watching the service.
    #[default]
    Human,
    /// One JSON object per line, for log shippers.
    Jsonl,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Human => "human",
            LogFormat::Jsonl => "jsonl",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "pretty" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            other => Err(format!("unknown log format '{}' (expected human or jsonl)", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum level that is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    const NAMES: [(LogLevel, &'static str); 6] = [
        (LogLevel::Trace, "trace"),
        (LogLevel::Debug, "debug"),
        (LogLevel::Info, "info"),
        (LogLevel::Warn, "warn"),
        (LogLevel::Error, "error"),
        (LogLevel::Off, "off"),
    ];

    pub fn as_str(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(level, _)| *level == self)
            .map_or("info", |(_, name)| *name)
    }

    /// Level requested by `-q` / `-v` flags; `None` defers to the environment.
    pub fn from_verbosity(quiet: bool, verbose: u8) -> Option<Self> {
        match (quiet, verbose) {
            (true, _) => Some(LogLevel::Error),
            (false, 0) => None,
            (false, 1) => Some(LogLevel::Debug),
            (false, _) => Some(LogLevel::Trace),
        }
    }

    /// Most verbose level mentioned in a `RUST_LOG` directive list.
    fn from_directives(directives: &str) -> Option<Self> {
        directives
            .split(',')
            .filter_map(|d| d.rsplit('=').next())
            .filter_map(|d| d.trim().parse::<LogLevel>().ok())
            .min()
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "warning" => return Ok(LogLevel::Warn),
            "none" | "quiet" => return Ok(LogLevel::Off),
            _ => {}
        }
        Self::NAMES
            .iter()
            .find(|(_, name)| *name == lower)
            .map(|(level, _)| *level)
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Timestamps on human lines; JSON lines always carry one.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::default(),
            level: LogLevel::default(),
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Resolve from the process environment plus CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_vars(
            std::env::var(LOG_LEVEL_ENV).ok().as_deref(),
            std::env::var("RUST_LOG").ok().as_deref(),
            std::env::var(LOG_FORMAT_ENV).ok().as_deref(),
            cli_level,
            cli_format,
        )
    }

    /// Resolve from explicit variable values.
    ///
    /// Unparseable environment values are ignored rather than fatal.
    pub fn from_vars(
        anon_log: Option<&str>,
        rust_log: Option<&str>,
        log_format: Option<&str>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        let env_level = match anon_log {
            Some(value) => value.parse().ok(),
            None => rust_log.and_then(LogLevel::from_directives),
        };

        LogConfig {
            format: cli_format
                .or_else(|| log_format.and_then(|v| v.parse().ok()))
                .unwrap_or_default(),
            level: cli_level.or(env_level).unwrap_or_default(),
            timestamps: true,
        }
    }
}
