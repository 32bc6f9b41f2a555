//! Policy-driven anonymization of security events.
//!
//! This crate loads a table of named redaction policies and applies them to
//! nested event records, rewriting sensitive field values in place before
//! events are shared with other parties.
//!
//! # Key Features
//!
//! - **Ordered policies**: policies apply in policy-file order; each yields
//!   one `(key pattern, value pattern, substitution)` triple per event.
//! - **Four actions**: suppression, IPv4 generalization, organization
//!   generalization and organization pseudonymization, plus explicit
//!   `VRE`/`SRE` policies.
//! - **Deep rewrite**: sub-events nested in records and lists are visited at
//!   any depth.
//! - **All-or-nothing loading**: a malformed policy or invalid pattern
//!   rejects the whole table before any event is touched.
//!
//! # Example
//!
//! ```no_run
//! use anon_redact::{Event, PolicyTable, Pseudonymizer, RedactionEngine, Scope};
//!
//! let table = PolicyTable::from_json_str(
//!     r#"{"ip": {"KRE": "^SRC_IP$", "ACTION": "generalization", "TYPE": "ip_address"}}"#,
//! ).unwrap();
//! let engine = RedactionEngine::new(table, Pseudonymizer::default()).unwrap();
//!
//! let mut event = Event::from_json_str(r#"{"SRC_IP": "10.1.2.3"}"#).unwrap();
//! engine.anonymize(&mut event, &Scope::All);
//! assert_eq!(event.get_text("SRC_IP"), Some("10.1.X.X"));
//! ```

pub mod action;
pub mod engine;
pub mod error;
pub mod event;
pub mod policy;
pub mod pseudonym;
pub mod resolve;

pub use action::{Action, TypeHint};
pub use engine::{
    apply_triple, compile_and_apply, AnonymizationReport, CompiledTriple, PolicyOutcome,
    PolicyStore, RedactionEngine, NO_DATA,
};
pub use error::{AnonError, Result};
pub use event::{Event, FieldValue, ENVELOPE_FIELD, ORGANIZATION_FIELD};
pub use policy::{PolicyDefinition, PolicyTable, Scope};
pub use pseudonym::{PseudonymStrategy, Pseudonymizer, UNKNOWN_PSEUDONYM};
pub use resolve::{
    resolve_triples, translate_template, RedactionKind, RedactionTriple, Substitution,
    GENERIC_ORGANIZATION, SUPPRESSION_MASK,
};
