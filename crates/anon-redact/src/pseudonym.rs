//! Organization pseudonyms.
//!
//! Deployments disagree on how an organization is pseudonymized, so the
//! strategy is an explicit engine setting:
//!
//! - `hash`: SHA-256 of the organization string, hex-encoded and truncated.
//!   Deterministic and one-way, but unkeyed; it does not claim
//!   cryptographic irreversibility (a short list of known organizations can
//!   be hashed and compared).
//! - `table`: a fixed organization → label lookup with a fallback label for
//!   organizations the table does not know.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Default number of digest bytes kept by the hash strategy (32 hex chars).
pub const DEFAULT_HASH_BYTES: usize = 16;

/// Label used by the table strategy for organizations it does not list.
pub const UNKNOWN_PSEUDONYM: &str = "unknown_pilot";

/// How organization pseudonyms are produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum PseudonymStrategy {
    /// Truncated SHA-256 hex digest of the organization.
    Hash {
        #[serde(default = "default_hash_bytes")]
        truncation_bytes: usize,
    },
    /// Fixed label lookup.
    Table {
        #[serde(default = "pilot_labels")]
        labels: BTreeMap<String, String>,
        #[serde(default = "default_fallback")]
        fallback: String,
    },
}

fn default_hash_bytes() -> usize {
    DEFAULT_HASH_BYTES
}

fn default_fallback() -> String {
    UNKNOWN_PSEUDONYM.to_string()
}

fn pilot_labels() -> BTreeMap<String, String> {
    [
        ("csi", "pilot1"),
        ("db", "pilot2"),
        ("hospital", "pilot3"),
        ("proto", "pilot4"),
    ]
    .into_iter()
    .map(|(org, label)| (org.to_string(), label.to_string()))
    .collect()
}

impl PseudonymStrategy {
    /// Hash strategy with the default digest length.
    pub fn hash() -> Self {
        PseudonymStrategy::Hash {
            truncation_bytes: DEFAULT_HASH_BYTES,
        }
    }

    /// The pilot deployment table.
    pub fn pilot_table() -> Self {
        PseudonymStrategy::Table {
            labels: pilot_labels(),
            fallback: default_fallback(),
        }
    }

    /// Short name of the strategy.
    pub fn name(&self) -> &'static str {
        match self {
            PseudonymStrategy::Hash { .. } => "hash",
            PseudonymStrategy::Table { .. } => "table",
        }
    }
}

impl Default for PseudonymStrategy {
    fn default() -> Self {
        Self::hash()
    }
}

/// Produces pseudonyms for organization identifiers.
#[derive(Debug, Clone, Default)]
pub struct Pseudonymizer {
    strategy: PseudonymStrategy,
}

impl Pseudonymizer {
    pub fn new(strategy: PseudonymStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &PseudonymStrategy {
        &self.strategy
    }

    /// Stable pseudonym for an organization.
    pub fn pseudonym(&self, organization: &str) -> String {
        match &self.strategy {
            PseudonymStrategy::Hash { truncation_bytes } => {
                let digest = Sha256::digest(organization.as_bytes());
                let keep = (*truncation_bytes).clamp(4, 32);
                hex::encode(&digest[..keep])
            }
            PseudonymStrategy::Table { labels, fallback } => labels
                .get(organization)
                .cloned()
                .unwrap_or_else(|| fallback.clone()),
        }
    }
}
