//! Configuration loading for anon-core.
//!
//! This module handles:
//! - Loading the optional TOML service configuration
//! - Resolution order (CLI flags > config file named by `--config`/`ANON_CONFIG` > defaults)
//! - Loading the policy document and recording its provenance

use anon_redact::{AnonError, PolicyTable, PseudonymStrategy, Scope};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the service configuration file.
pub const CONFIG_ENV: &str = "ANON_CONFIG";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required setting '{setting}' (pass --{setting} or set it in the config file)")]
    Missing { setting: &'static str },

    #[error("invalid policy file {path}: {source}")]
    Policy {
        path: PathBuf,
        #[source]
        source: AnonError,
    },

    #[error("could not resolve a default audit log location: {0}")]
    AuditPath(String),
}

impl ConfigError {
    /// Whether the error concerns the policy document itself.
    pub fn is_policy_error(&self) -> bool {
        matches!(self, ConfigError::Policy { source, .. } if !matches!(source, AnonError::Io(_)))
    }
}

/// What is written to the output stream for each anonymized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The anonymized event, re-wrapped in its `AlarmEvent` envelope.
    #[default]
    Event,
    /// A MISP event document.
    Misp,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Event => write!(f, "event"),
            OutputFormat::Misp => write!(f, "misp"),
        }
    }
}

/// Pseudonym strategy selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PseudonymChoice {
    /// Truncated SHA-256 of the organization.
    Hash,
    /// Fixed pilot label table.
    Table,
}

impl PseudonymChoice {
    pub fn strategy(self) -> PseudonymStrategy {
        match self {
            PseudonymChoice::Hash => PseudonymStrategy::hash(),
            PseudonymChoice::Table => PseudonymStrategy::pilot_table(),
        }
    }
}

/// `[audit]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditSettings {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        AuditSettings {
            enabled: true,
            path: None,
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSettings {
    pub format: OutputFormat,
}

/// Service configuration file.
///
/// ```toml
/// scope = "hospital"
/// policies = "/etc/anon/policies.json"
/// jobs = 4
///
/// [pseudonym]
/// strategy = "table"
///
/// [audit]
/// path = "/var/lib/anon/anonymization_log.jsonl"
///
/// [output]
/// format = "misp"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub scope: Option<String>,
    pub policies: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub pseudonym: PseudonymStrategy,
    pub audit: AuditSettings,
    pub output: OutputSettings,
}

impl ServiceConfig {
    pub fn from_toml_str(s: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&content, path)
    }
}

/// Command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    /// Service configuration file (`--config` or `ANON_CONFIG`).
    pub config_path: Option<PathBuf>,
    pub policies: Option<PathBuf>,
    pub scope: Option<String>,
    pub pseudonym: Option<PseudonymChoice>,
    pub audit_log: Option<PathBuf>,
    /// Disable the audit log regardless of the config file.
    pub no_audit: bool,
    pub format: Option<OutputFormat>,
    pub jobs: Option<usize>,
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub scope: Scope,
    pub table: PolicyTable,
    pub policies_path: PathBuf,
    /// SHA-256 of the policy file content.
    pub policies_hash: String,
    pub pseudonym: PseudonymStrategy,
    /// `None` when auditing is disabled.
    pub audit_path: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub jobs: usize,
    /// Service configuration file used, if any.
    pub config_path: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            scope: self.scope.to_string(),
            policies_path: self.policies_path.clone(),
            policies_hash: self.policies_hash.clone(),
            policy_count: self.table.len(),
            pseudonym: self.pseudonym.name().to_string(),
            audit_path: self.audit_path.clone(),
            output_format: self.output_format,
            jobs: self.jobs,
            config_path: self.config_path.clone(),
        }
    }
}

/// Serializable summary of a resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub scope: String,
    pub policies_path: PathBuf,
    pub policies_hash: String,
    pub policy_count: usize,
    pub pseudonym: String,
    pub audit_path: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub jobs: usize,
    pub config_path: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit CLI flags
/// 2. The service configuration file, if one was named
/// 3. Built-in defaults
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let file = match &options.config_path {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    let scope = options
        .scope
        .as_deref()
        .or(file.scope.as_deref())
        .map(Scope::parse)
        .ok_or(ConfigError::Missing { setting: "scope" })?;

    let policies_path = options
        .policies
        .clone()
        .or_else(|| file.policies.clone())
        .ok_or(ConfigError::Missing {
            setting: "policies",
        })?;
    let (table, policies_hash) = load_policy_file(&policies_path)?;

    let pseudonym = options
        .pseudonym
        .map(PseudonymChoice::strategy)
        .unwrap_or_else(|| file.pseudonym.clone());

    let audit_path = if options.no_audit {
        None
    } else if let Some(path) = &options.audit_log {
        Some(path.clone())
    } else if !file.audit.enabled {
        None
    } else if let Some(path) = &file.audit.path {
        Some(path.clone())
    } else {
        Some(crate::audit::default_audit_path().map_err(|e| ConfigError::AuditPath(e.to_string()))?)
    };

    Ok(ResolvedConfig {
        scope,
        table,
        policies_path,
        policies_hash,
        pseudonym,
        audit_path,
        output_format: options.format.unwrap_or(file.output.format),
        jobs: options.jobs.or(file.jobs).unwrap_or(1).max(1),
        config_path: options.config_path.clone(),
    })
}

/// Load a policy document and hash its content.
pub fn load_policy_file(path: &Path) -> Result<(PolicyTable, String), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let hash = compute_hash(&content);

    let table = PolicyTable::from_json_str(&content).map_err(|e| ConfigError::Policy {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok((table, hash))
}

/// SHA-256 of content, hex-encoded.
pub fn compute_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
