//! Anonymization service core.
//!
//! Wraps the `anon-redact` engine with everything a running service needs:
//! - Exit codes for CLI operations
//! - Configuration loading and policy provenance
//! - Structured logging
//! - Event ingestion with acknowledgement semantics
//! - The hash-chained anonymization audit log
//! - MISP event mapping for downstream sharing
//!
//! The binary entry point is in `main.rs`.

pub mod audit;
pub mod config;
pub mod exit_codes;
pub mod ingest;
pub mod logging;
pub mod misp;
