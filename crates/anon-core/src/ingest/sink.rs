//! Destinations for anonymized events.

use super::IngestError;
use crate::audit::{AuditContext, AuditLog};
use crate::config::OutputFormat;
use crate::misp::to_misp_event;
use anon_redact::{AnonymizationReport, Event};
use std::io::Write;

/// An event that went through the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEvent {
    pub sequence: u64,
    pub event: Event,
    pub report: AnonymizationReport,
}

/// Consumer of anonymized events.
///
/// An error from `emit` stops the stream: the event is neither acknowledged
/// nor rejected.
pub trait EventSink {
    fn emit(&mut self, processed: &ProcessedEvent) -> Result<(), IngestError>;

    /// Called once after the last event.
    fn finish(&mut self) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Writes one JSON document per event.
pub struct OutputSink<W: Write> {
    writer: W,
    format: OutputFormat,
}

impl<W: Write> OutputSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        OutputSink { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for OutputSink<W> {
    fn emit(&mut self, processed: &ProcessedEvent) -> Result<(), IngestError> {
        let document = match self.format {
            OutputFormat::Event => processed.event.wrap_envelope()?,
            OutputFormat::Misp => to_misp_event(&processed.event),
        };
        let line = serde_json::to_string(&document)?;
        writeln!(self.writer, "{}", line).map_err(IngestError::Write)
    }

    fn finish(&mut self) -> Result<(), IngestError> {
        self.writer.flush().map_err(IngestError::Write)
    }
}

/// Appends every anonymized event to the audit log.
pub struct AuditSink {
    log: AuditLog,
    ctx: AuditContext,
}

impl AuditSink {
    pub fn new(log: AuditLog, ctx: AuditContext) -> Self {
        AuditSink { log, ctx }
    }

    pub fn log(&self) -> &AuditLog {
        &self.log
    }
}

impl EventSink for AuditSink {
    fn emit(&mut self, processed: &ProcessedEvent) -> Result<(), IngestError> {
        let event = processed.event.to_value()?;
        self.log
            .record(&self.ctx, processed.sequence, event, &processed.report)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), IngestError> {
        self.log.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::verify_log;
    use serde_json::{json, Value};

    fn processed(sequence: u64) -> ProcessedEvent {
        let event = Event::from_value(json!({
            "ORGANIZATION": "hospital",
            "SRC_IP": "10.0.X.X",
            "SRC_PORT": "22",
        }))
        .unwrap();
        ProcessedEvent {
            sequence,
            event,
            report: AnonymizationReport::default(),
        }
    }

    #[test]
    fn test_output_sink_writes_envelope() {
        let mut sink = OutputSink::new(Vec::new(), OutputFormat::Event);
        sink.emit(&processed(0)).unwrap();
        sink.finish().unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let doc: Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(doc["AlarmEvent"]["SRC_IP"], "10.0.X.X");
    }

    #[test]
    fn test_output_sink_writes_misp() {
        let mut sink = OutputSink::new(Vec::new(), OutputFormat::Misp);
        sink.emit(&processed(0)).unwrap();
        sink.emit(&processed(1)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 2);
        let doc: Value = serde_json::from_str(out.lines().next().unwrap()).unwrap();
        assert_eq!(doc["Event"]["Attribute"][0]["type"], "port");
    }

    #[test]
    fn test_audit_sink_records_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path).unwrap();
        let mut sink = AuditSink::new(log, AuditContext::new("run-sink", "hospital"));

        sink.emit(&processed(0)).unwrap();
        sink.emit(&processed(1)).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.log().entry_count(), 2);

        let result = verify_log(&path).unwrap();
        assert!(result.is_valid);
        assert_eq!(result.entries_verified, 2);
    }
}
