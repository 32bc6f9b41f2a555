//! Tamper-evident log of anonymized events.
//!
//! Every anonymized event is appended to the audit log together with the
//! policies that touched it. Each entry includes a SHA-256 hash of the
//! previous entry, so removing or editing a line breaks the chain.
//!
//! # Design
//!
//! - **Format**: JSON Lines (JSONL), one entry per line
//! - **Hash chain**: Each entry includes `prev_hash` (the previous `entry_hash`)
//! - **Verification**: `verify_log()` validates the complete hash chain
//!
//! # File Location
//!
//! Unless a path is configured, the log is stored at:
//! - `$ANON_DATA/anonymization_log.jsonl` (if ANON_DATA is set)
//! - `$XDG_DATA_HOME/anonymizer/anonymization_log.jsonl` (otherwise)

mod entry;
mod verify;
mod writer;

pub use entry::{AuditContext, AuditEntry, AUDIT_SCHEMA_VERSION};
pub use verify::{
    verify_log, AlteredEntry, BreakKind, ChainBreak, RunSummary, VerificationResult,
    VerificationWarning,
};
pub use writer::{AuditLog, GENESIS_HASH};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during audit logging operations.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to resolve audit log directory (set ANON_DATA or XDG_DATA_HOME)")]
    DataDirUnavailable,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize audit entry: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse audit entry at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Directory name under the platform data directory.
const DATA_DIR_NAME: &str = "anonymizer";

/// Default audit log filename.
pub const AUDIT_LOG_FILENAME: &str = "anonymization_log.jsonl";

/// Resolve the default audit log path.
pub fn default_audit_path() -> Result<PathBuf, AuditError> {
    if let Ok(dir) = std::env::var("ANON_DATA") {
        return Ok(PathBuf::from(dir).join(AUDIT_LOG_FILENAME));
    }

    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return Ok(PathBuf::from(xdg).join(DATA_DIR_NAME).join(AUDIT_LOG_FILENAME));
    }

    if let Some(base) = dirs::data_dir() {
        return Ok(base.join(DATA_DIR_NAME).join(AUDIT_LOG_FILENAME));
    }

    Err(AuditError::DataDirUnavailable)
}
