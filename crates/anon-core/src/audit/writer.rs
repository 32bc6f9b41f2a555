//! Audit log writer maintaining the hash chain.

use super::entry::{AuditContext, AuditEntry};
use super::AuditError;
use anon_redact::AnonymizationReport;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The special hash used for the first entry in a new log file.
pub const GENESIS_HASH: &str = "genesis";

/// Append-only audit log.
///
/// Reopening an existing log continues its chain from the last entry.
pub struct AuditLog {
    path: PathBuf,
    /// Hash of the last entry written (for chaining).
    last_hash: String,
    entry_count: u64,
    writer: Option<BufWriter<File>>,
}

impl AuditLog {
    /// Open an existing audit log or create a new one at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let (last_hash, entry_count) = if path.exists() {
            Self::read_last_entry_hash(&path)?
        } else {
            (GENESIS_HASH.to_string(), 0)
        };

        debug!(path = %path.display(), entry_count, "audit log opened");

        Ok(AuditLog {
            path,
            last_hash,
            entry_count,
            writer: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries in the log, including ones written before this run.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// Chain and append an entry.
    pub fn write_entry(&mut self, mut entry: AuditEntry) -> Result<(), AuditError> {
        entry.prev_hash = self.last_hash.clone();
        entry.compute_hash();

        let line = serde_json::to_string(&entry)
            .map_err(|e| AuditError::Serialization { source: e })?;

        let path = self.path.clone();
        let writer = self.writer_mut()?;
        writeln!(writer, "{}", line)
            .and_then(|_| writer.flush())
            .map_err(|e| AuditError::Io { path, source: e })?;

        self.last_hash = entry.hash().to_string();
        self.entry_count += 1;
        Ok(())
    }

    /// Record one anonymized event.
    pub fn record(
        &mut self,
        ctx: &AuditContext,
        sequence: u64,
        event: serde_json::Value,
        report: &AnonymizationReport,
    ) -> Result<(), AuditError> {
        let entry = AuditEntry::new(ctx, sequence, report, event, &self.last_hash);
        self.write_entry(entry)
    }

    /// Flush any buffered writes.
    pub fn flush(&mut self) -> Result<(), AuditError> {
        if let Some(ref mut writer) = self.writer {
            writer.flush().map_err(|e| AuditError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    fn writer_mut(&mut self) -> Result<&mut BufWriter<File>, AuditError> {
        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| AuditError::Io {
                    path: self.path.clone(),
                    source: e,
                })?;
            self.writer = Some(BufWriter::new(file));
        }
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(AuditError::Io {
                path: self.path.clone(),
                source: std::io::Error::other("audit writer unavailable"),
            }),
        }
    }

    /// Read the last entry hash from an existing log file.
    fn read_last_entry_hash(path: &Path) -> Result<(String, u64), AuditError> {
        let file = File::open(path).map_err(|e| AuditError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut last_hash = GENESIS_HASH.to_string();
        let mut count = 0u64;

        for (line_idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| AuditError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| AuditError::Parse {
                line: line_idx + 1,
                source: e,
            })?;

            if let Some(hash) = &entry.entry_hash {
                last_hash = hash.clone();
            }
            count += 1;
        }

        Ok((last_hash, count))
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        if let Some(ref mut writer) = self.writer {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::verify_log;
    use serde_json::json;
    use tempfile::TempDir;

    fn ctx() -> AuditContext {
        AuditContext::new("run-test", "hospital")
    }

    #[test]
    fn test_new_log_starts_at_genesis() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::open(tmp.path().join("nested/dir/audit.jsonl")).unwrap();
        assert_eq!(log.entry_count(), 0);
        assert_eq!(log.last_hash(), GENESIS_HASH);
        assert!(tmp.path().join("nested/dir").is_dir());
    }

    #[test]
    fn test_write_chains_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let mut log = AuditLog::open(&path).unwrap();
        let report = AnonymizationReport::default();

        log.record(&ctx(), 0, json!({"A": 1}), &report).unwrap();
        let first = log.last_hash().to_string();
        log.record(&ctx(), 1, json!({"A": 2}), &report).unwrap();
        assert_eq!(log.entry_count(), 2);

        let lines: Vec<AuditEntry> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0].prev_hash, GENESIS_HASH);
        assert_eq!(lines[1].prev_hash, first);
        assert!(lines.iter().all(AuditEntry::verify_hash));
    }

    #[test]
    fn test_reopen_continues_chain() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let report = AnonymizationReport::default();

        let last = {
            let mut log = AuditLog::open(&path).unwrap();
            log.record(&ctx(), 0, json!({}), &report).unwrap();
            log.last_hash().to_string()
        };

        let mut log = AuditLog::open(&path).unwrap();
        assert_eq!(log.entry_count(), 1);
        assert_eq!(log.last_hash(), last);
        log.record(&ctx(), 0, json!({}), &report).unwrap();
        drop(log);

        let result = verify_log(&path).unwrap();
        assert!(result.is_valid);
        assert_eq!(result.entries_verified, 2);
    }

    #[test]
    fn test_open_rejects_corrupt_log() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        assert!(matches!(AuditLog::open(&path), Err(AuditError::Parse { line: 1, .. })));
    }
}
