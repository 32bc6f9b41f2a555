//! Audit log entry schema.
//!
//! Each entry records one anonymized event:
//! - Timestamp (ISO-8601 with microseconds)
//! - Run context for correlation (run id, scope, policy file hash)
//! - Which policies applied and how many fields they rewrote
//! - The anonymized event itself
//! - Hash chain fields for integrity

use anon_redact::AnonymizationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Schema version for audit log entries.
pub const AUDIT_SCHEMA_VERSION: &str = "1.0.0";

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub schema_version: String,

    pub ts: DateTime<Utc>,

    /// Unique ID for this invocation of anon-core.
    pub run_id: String,

    /// Position of the delivery in the input stream.
    pub sequence: u64,

    /// Run scope the event was processed under.
    pub scope: String,

    /// SHA-256 of the policy file in force.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_hash: Option<String>,

    /// Policies that were in scope, in application order.
    pub policies_applied: Vec<String>,

    pub fields_rewritten: usize,

    /// The anonymized event.
    pub event: serde_json::Value,

    /// `entry_hash` of the previous entry, or `genesis` for the first one.
    pub prev_hash: String,

    /// SHA-256 of this entry serialized without `entry_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_hash: Option<String>,
}

impl AuditEntry {
    /// Create an entry for one anonymized event.
    pub fn new(
        ctx: &AuditContext,
        sequence: u64,
        report: &AnonymizationReport,
        event: serde_json::Value,
        prev_hash: impl Into<String>,
    ) -> Self {
        AuditEntry {
            schema_version: AUDIT_SCHEMA_VERSION.to_string(),
            ts: Utc::now(),
            run_id: ctx.run_id.clone(),
            sequence,
            scope: ctx.scope.clone(),
            policy_hash: ctx.policy_hash.clone(),
            policies_applied: report
                .policies_applied()
                .into_iter()
                .map(str::to_string)
                .collect(),
            fields_rewritten: report.fields_rewritten(),
            event,
            prev_hash: prev_hash.into(),
            entry_hash: None,
        }
    }

    /// Hash of the entry with `entry_hash` cleared.
    pub fn digest(&self) -> String {
        let mut unhashed = self.clone();
        unhashed.entry_hash = None;
        let json = serde_json::to_string(&unhashed).unwrap_or_default();
        hex::encode(Sha256::digest(json.as_bytes()))
    }

    /// Compute and set the entry hash.
    pub fn compute_hash(&mut self) {
        self.entry_hash = Some(self.digest());
    }

    /// Verify that the stored entry hash is correct.
    pub fn verify_hash(&self) -> bool {
        match &self.entry_hash {
            Some(stored) => *stored == self.digest(),
            None => false,
        }
    }

    /// The entry hash (for chaining).
    pub fn hash(&self) -> &str {
        self.entry_hash.as_deref().unwrap_or("invalid")
    }
}

/// Context shared by every entry of a run.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub run_id: String,
    pub scope: String,
    pub policy_hash: Option<String>,
}

impl AuditContext {
    pub fn new(run_id: impl Into<String>, scope: impl Into<String>) -> Self {
        AuditContext {
            run_id: run_id.into(),
            scope: scope.into(),
            policy_hash: None,
        }
    }

    pub fn with_policy_hash(mut self, hash: impl Into<String>) -> Self {
        self.policy_hash = Some(hash.into());
        self
    }
}
