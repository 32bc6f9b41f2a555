//! Re-checking the anonymization log after the fact.
//!
//! Walks the log once, recomputing every entry hash and following the
//! `prev_hash` links from the genesis marker. Besides tampering, it reports
//! per-run totals so an operator can see what each run rewrote.

use super::entry::{AuditEntry, AUDIT_SCHEMA_VERSION};
use super::writer::GENESIS_HASH;
use super::AuditError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Digest reported for a log with no entries.
const EMPTY_DIGEST: &str = "empty";

/// Outcome of walking an audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub entries_verified: u64,

    /// SHA-256 over the entry hashes in file order.
    pub chain_digest: String,

    /// Totals per run, in order of first appearance.
    pub runs: Vec<RunSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_break: Option<ChainBreak>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub altered_entries: Vec<AlteredEntry>,

    /// Non-fatal findings: foreign schema versions, out-of-order sequences.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<VerificationWarning>,
}

/// What one run wrote to the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scope: String,
    pub events: u64,
    pub fields_rewritten: usize,
}

/// First point where `prev_hash` stops matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainBreak {
    /// 1-indexed line.
    pub line: usize,
    pub expected_prev: String,
    pub found_prev: String,
    pub kind: BreakKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Link to the preceding entry is wrong (line removed, reordered or inserted).
    ChainMismatch,
    /// First entry does not start from genesis (log head truncated).
    InvalidGenesis,
}

/// An entry whose content no longer hashes to its stored `entry_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlteredEntry {
    pub line: usize,
    pub run_id: String,
    pub sequence: u64,
    pub stored_hash: Option<String>,
    pub computed_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationWarning {
    SchemaVersion { line: usize, found: String },
    SequenceOrder { line: usize, run_id: String, previous: u64, found: u64 },
}

/// Running state of one pass over the log.
struct ChainWalk {
    expected_prev: String,
    digest: Sha256,
    entries: u64,
    runs: Vec<RunSummary>,
    last_sequence: Vec<(String, u64)>,
    chain_break: Option<ChainBreak>,
    altered: Vec<AlteredEntry>,
    warnings: Vec<VerificationWarning>,
}

impl ChainWalk {
    fn new() -> Self {
        ChainWalk {
            expected_prev: GENESIS_HASH.to_string(),
            digest: Sha256::new(),
            entries: 0,
            runs: Vec::new(),
            last_sequence: Vec::new(),
            chain_break: None,
            altered: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn observe(&mut self, line: usize, entry: AuditEntry) {
        if entry.schema_version != AUDIT_SCHEMA_VERSION {
            self.warnings.push(VerificationWarning::SchemaVersion {
                line,
                found: entry.schema_version.clone(),
            });
        }

        let computed = entry.digest();
        if entry.entry_hash.as_deref() != Some(computed.as_str()) {
            self.altered.push(AlteredEntry {
                line,
                run_id: entry.run_id.clone(),
                sequence: entry.sequence,
                stored_hash: entry.entry_hash.clone(),
                computed_hash: computed,
            });
        }

        if self.chain_break.is_none() && entry.prev_hash != self.expected_prev {
            let kind = if self.entries == 0 {
                BreakKind::InvalidGenesis
            } else {
                BreakKind::ChainMismatch
            };
            self.chain_break = Some(ChainBreak {
                line,
                expected_prev: self.expected_prev.clone(),
                found_prev: entry.prev_hash.clone(),
                kind,
            });
        }

        self.track_sequence(line, &entry);
        self.tally_run(&entry);

        if let Some(hash) = &entry.entry_hash {
            self.digest.update(hash.as_bytes());
            self.expected_prev = hash.clone();
        }
        self.entries += 1;
    }

    fn track_sequence(&mut self, line: usize, entry: &AuditEntry) {
        match self.last_sequence.iter_mut().find(|(run, _)| *run == entry.run_id) {
            Some((_, previous)) => {
                if entry.sequence <= *previous {
                    self.warnings.push(VerificationWarning::SequenceOrder {
                        line,
                        run_id: entry.run_id.clone(),
                        previous: *previous,
                        found: entry.sequence,
                    });
                }
                *previous = entry.sequence;
            }
            None => self.last_sequence.push((entry.run_id.clone(), entry.sequence)),
        }
    }

    fn tally_run(&mut self, entry: &AuditEntry) {
        match self.runs.iter_mut().find(|run| run.run_id == entry.run_id) {
            Some(run) => {
                run.events += 1;
                run.fields_rewritten += entry.fields_rewritten;
            }
            None => self.runs.push(RunSummary {
                run_id: entry.run_id.clone(),
                scope: entry.scope.clone(),
                events: 1,
                fields_rewritten: entry.fields_rewritten,
            }),
        }
    }

    fn finish(self) -> VerificationResult {
        let chain_digest = if self.entries == 0 {
            EMPTY_DIGEST.to_string()
        } else {
            hex::encode(self.digest.finalize())
        };
        VerificationResult {
            is_valid: self.chain_break.is_none() && self.altered.is_empty(),
            entries_verified: self.entries,
            chain_digest,
            runs: self.runs,
            chain_break: self.chain_break,
            altered_entries: self.altered,
            warnings: self.warnings,
        }
    }
}

/// Verify an audit log file.
///
/// A missing file is an empty, valid log. A line that is not an audit entry
/// at all is an error rather than a finding.
pub fn verify_log(path: &Path) -> Result<VerificationResult, AuditError> {
    let mut walk = ChainWalk::new();
    if !path.exists() {
        return Ok(walk.finish());
    }

    let io_error = |e| AuditError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let reader = BufReader::new(File::open(path).map_err(io_error)?);

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(io_error)?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| AuditError::Parse {
            line: idx + 1,
            source: e,
        })?;
        walk.observe(idx + 1, entry);
    }

    Ok(walk.finish())
}
