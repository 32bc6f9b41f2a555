//! Error types for the anonymization engine.

use thiserror::Error;

/// Result type for anonymization operations.
pub type Result<T> = std::result::Result<T, AnonError>;

/// Errors that can occur while loading or compiling redaction policies.
///
/// Missing or null event fields are never errors: they are normalized to a
/// sentinel string and processed like any other value.
#[derive(Error, Debug)]
pub enum AnonError {
    /// A policy definition is malformed or incomplete for its action kind.
    #[error("configuration error in policy '{policy}': {reason}")]
    Configuration { policy: String, reason: String },

    /// A key or value pattern is not a valid regular expression.
    #[error("policy '{policy}' has an invalid pattern '{pattern}': {reason}")]
    PolicyCompilation {
        policy: String,
        pattern: String,
        reason: String,
    },

    /// I/O error while reading a policy file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnonError {
    /// Create a configuration error for the named policy.
    pub fn configuration(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        AnonError::Configuration {
            policy: policy.into(),
            reason: reason.into(),
        }
    }

    /// Name of the offending policy, when the error is tied to one.
    pub fn policy(&self) -> Option<&str> {
        match self {
            AnonError::Configuration { policy, .. } | AnonError::PolicyCompilation { policy, .. } => {
                Some(policy)
            }
            AnonError::Io(_) | AnonError::Json(_) => None,
        }
    }
}
