//! Event ingestion: reading deliveries, acknowledging them, and handing
//! anonymized events to the output sinks.
//!
//! Deliveries are JSON Lines read from a file or stdin, one message per line.
//! A delivery is acknowledged only after every sink accepted the anonymized
//! event, and rejected when its payload cannot be parsed.

mod pipeline;
mod sink;

pub use pipeline::{process_parallel, process_stream, StreamSummary};
pub use sink::{AuditSink, EventSink, OutputSink, ProcessedEvent};

use crate::audit::AuditError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that stop the ingestion loop.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open input {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read input at line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// One message taken off the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Position among non-blank input lines, starting at 0.
    pub sequence: u64,
    pub payload: String,
}

/// JSON Lines reader producing deliveries.
pub struct EventSource {
    reader: Box<dyn BufRead + Send>,
    line: u64,
    sequence: u64,
}

impl EventSource {
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        EventSource {
            reader: Box::new(reader),
            line: 0,
            sequence: 0,
        }
    }

    /// Read deliveries from a file.
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let file = File::open(path).map_err(|e| IngestError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(std::io::stdin()))
    }
}

impl Iterator for EventSource {
    type Item = Result<Delivery, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut buf = String::new();
            self.line += 1;
            match self.reader.read_line(&mut buf) {
                Ok(0) => return None,
                Ok(_) => {
                    let payload = buf.trim();
                    if payload.is_empty() {
                        continue;
                    }
                    let delivery = Delivery {
                        sequence: self.sequence,
                        payload: payload.to_string(),
                    };
                    self.sequence += 1;
                    return Some(Ok(delivery));
                }
                Err(e) => {
                    return Some(Err(IngestError::Read {
                        line: self.line,
                        source: e,
                    }))
                }
            }
        }
    }
}

/// Settles deliveries with the upstream broker.
pub trait Acknowledger {
    /// The delivery was fully processed.
    fn ack(&mut self, sequence: u64);

    /// The delivery cannot be processed and must not be redelivered.
    fn reject(&mut self, sequence: u64, reason: &str);
}

/// Acknowledger that only keeps tallies.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CountingAcknowledger {
    pub acked: u64,
    pub rejected: u64,
}

impl CountingAcknowledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_rejections(&self) -> bool {
        self.rejected > 0
    }
}

impl Acknowledger for CountingAcknowledger {
    fn ack(&mut self, _sequence: u64) {
        self.acked += 1;
    }

    fn reject(&mut self, _sequence: u64, _reason: &str) {
        self.rejected += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_source_skips_blank_lines() {
        let input = "{\"A\": 1}\n\n   \n{\"A\": 2}\n";
        let deliveries: Vec<Delivery> = EventSource::from_reader(Cursor::new(input))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].sequence, 0);
        assert_eq!(deliveries[1].sequence, 1);
        assert_eq!(deliveries[1].payload, "{\"A\": 2}");
    }

    #[test]
    fn test_source_last_line_without_newline() {
        let deliveries: Vec<Delivery> = EventSource::from_reader(Cursor::new("{}\n{\"B\":true}"))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[1].payload, "{\"B\":true}");
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = EventSource::open(&dir.path().join("missing.jsonl"));
        assert!(matches!(result, Err(IngestError::Open { .. })));
    }

    #[test]
    fn test_counting_acknowledger() {
        let mut ack = CountingAcknowledger::new();
        ack.ack(0);
        ack.reject(1, "bad json");
        ack.ack(2);
        assert_eq!(ack.acked, 2);
        assert_eq!(ack.rejected, 1);
        assert!(ack.has_rejections());
    }
}
