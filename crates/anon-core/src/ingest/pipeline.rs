//! The ingestion loop.

use super::sink::{EventSink, ProcessedEvent};
use super::{Acknowledger, Delivery, IngestError};
use anon_redact::{Event, RedactionEngine, Scope};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Deliveries each worker takes per batch.
const DELIVERIES_PER_WORKER: usize = 64;

/// Totals for one pass over the input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub received: u64,
    pub anonymized: u64,
    pub rejected: u64,
    pub fields_rewritten: usize,
}

struct Rejection {
    sequence: u64,
    reason: String,
}

type Outcome = Result<ProcessedEvent, Rejection>;

/// Parse and anonymize one delivery.
fn anonymize_delivery(engine: &RedactionEngine, scope: &Scope, delivery: Delivery) -> Outcome {
    let parsed = serde_json::from_str(&delivery.payload).and_then(Event::unwrap_envelope);
    let mut event = match parsed {
        Ok(event) => event,
        Err(e) => {
            return Err(Rejection {
                sequence: delivery.sequence,
                reason: format!("malformed payload: {}", e),
            })
        }
    };

    let report = engine.anonymize(&mut event, scope);
    info!(
        sequence = delivery.sequence,
        organization = %report.organization,
        policies_applied = report.policies_applied().len(),
        fields_rewritten = report.fields_rewritten(),
        "event anonymized"
    );

    Ok(ProcessedEvent {
        sequence: delivery.sequence,
        event,
        report,
    })
}

/// Hand one outcome to the sinks and settle the delivery.
fn settle(
    outcome: Outcome,
    sinks: &mut [&mut dyn EventSink],
    ack: &mut dyn Acknowledger,
    summary: &mut StreamSummary,
) -> Result<(), IngestError> {
    summary.received += 1;
    match outcome {
        Ok(processed) => {
            for sink in sinks.iter_mut() {
                sink.emit(&processed)?;
            }
            ack.ack(processed.sequence);
            summary.anonymized += 1;
            summary.fields_rewritten += processed.report.fields_rewritten();
        }
        Err(rejection) => {
            warn!(sequence = rejection.sequence, reason = %rejection.reason, "delivery rejected");
            ack.reject(rejection.sequence, &rejection.reason);
            summary.rejected += 1;
        }
    }
    Ok(())
}

fn finish(sinks: &mut [&mut dyn EventSink], summary: &StreamSummary) -> Result<(), IngestError> {
    for sink in sinks.iter_mut() {
        sink.finish()?;
    }
    info!(
        received = summary.received,
        anonymized = summary.anonymized,
        rejected = summary.rejected,
        fields_rewritten = summary.fields_rewritten,
        "input exhausted"
    );
    Ok(())
}

/// Process deliveries one at a time, in input order.
pub fn process_stream<I>(
    engine: &RedactionEngine,
    scope: &Scope,
    source: I,
    sinks: &mut [&mut dyn EventSink],
    ack: &mut dyn Acknowledger,
) -> Result<StreamSummary, IngestError>
where
    I: IntoIterator<Item = Result<Delivery, IngestError>>,
{
    let mut summary = StreamSummary::default();
    for delivery in source {
        let outcome = anonymize_delivery(engine, scope, delivery?);
        settle(outcome, sinks, ack, &mut summary)?;
    }
    finish(sinks, &summary)?;
    Ok(summary)
}

/// Process deliveries on `jobs` worker threads sharing one engine.
///
/// Deliveries are read in batches; each worker anonymizes its own slice of
/// the batch and the results are handed to the sinks in sequence order.
pub fn process_parallel<I>(
    engine: Arc<RedactionEngine>,
    scope: &Scope,
    source: I,
    jobs: usize,
    sinks: &mut [&mut dyn EventSink],
    ack: &mut dyn Acknowledger,
) -> Result<StreamSummary, IngestError>
where
    I: IntoIterator<Item = Result<Delivery, IngestError>>,
{
    let jobs = jobs.max(1);
    if jobs == 1 {
        return process_stream(&engine, scope, source, sinks, ack);
    }

    let batch_size = jobs * DELIVERIES_PER_WORKER;
    let mut summary = StreamSummary::default();
    let mut source = source.into_iter();

    loop {
        let batch = source
            .by_ref()
            .take(batch_size)
            .collect::<Result<Vec<_>, _>>()?;
        if batch.is_empty() {
            break;
        }
        debug!(deliveries = batch.len(), jobs, "processing batch");

        let mut outcomes = anonymize_batch(&engine, scope, batch, jobs);
        outcomes.sort_by_key(|outcome| match outcome {
            Ok(processed) => processed.sequence,
            Err(rejection) => rejection.sequence,
        });

        for outcome in outcomes {
            settle(outcome, sinks, ack, &mut summary)?;
        }
    }

    finish(sinks, &summary)?;
    Ok(summary)
}

fn anonymize_batch(
    engine: &Arc<RedactionEngine>,
    scope: &Scope,
    batch: Vec<Delivery>,
    jobs: usize,
) -> Vec<Outcome> {
    let per_worker = batch.len().div_ceil(jobs);
    let mut slices: Vec<Vec<Delivery>> = Vec::with_capacity(jobs);
    let mut rest = batch.into_iter().peekable();
    while rest.peek().is_some() {
        slices.push(rest.by_ref().take(per_worker).collect());
    }

    thread::scope(|s| {
        let handles: Vec<_> = slices
            .into_iter()
            .map(|slice| {
                let sequences: Vec<u64> = slice.iter().map(|d| d.sequence).collect();
                let engine = Arc::clone(engine);
                let handle = s.spawn(move || {
                    slice
                        .into_iter()
                        .map(|delivery| anonymize_delivery(&engine, scope, delivery))
                        .collect::<Vec<_>>()
                });
                (sequences, handle)
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|(sequences, handle)| {
                handle.join().unwrap_or_else(|_| {
                    error!("anonymization worker panicked");
                    sequences
                        .into_iter()
                        .map(|sequence| {
                            Err(Rejection {
                                sequence,
                                reason: "worker panicked".to_string(),
                            })
                        })
                        .collect()
                })
            })
            .collect()
    })
}
