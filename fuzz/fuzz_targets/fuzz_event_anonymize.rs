//! Fuzz target for anonymizing arbitrary event payloads.
//!
//! Runs a fixed pilot policy table over whatever parses as an event and
//! checks the rewritten event still serializes.

#![no_main]

use anon_redact::{Event, PolicyTable, PseudonymStrategy, Pseudonymizer, RedactionEngine, Scope};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

const POLICIES: &str = r#"{
    "src_ip":   {"KRE": "^SRC_IP$", "ACTION": "generalization", "TYPE": "ip_address"},
    "dst_ip":   {"KRE": "^DST_IP$", "ACTION": "generalization", "TYPE": "ip_address"},
    "username": {"KRE": "^USER", "ACTION": "suppression"},
    "userdata": {"KRE": "^USERDATA[0-9]$", "VRE": "(user=)[^ ]+", "SRE": "\\1hidden"},
    "org":      {"KRE": "^ORGANIZATION$", "ACTION": "pseudonimization", "TYPE": "organization"}
}"#;

#[derive(Debug, Arbitrary)]
struct Input {
    scope: String,
    table_pseudonyms: bool,
    payload: String,
}

fuzz_target!(|input: Input| {
    let Ok(value) = serde_json::from_str(&input.payload) else {
        return;
    };
    let Ok(mut event) = Event::unwrap_envelope(value) else {
        return;
    };

    let strategy = if input.table_pseudonyms {
        PseudonymStrategy::pilot_table()
    } else {
        PseudonymStrategy::default()
    };
    let Ok(engine) = PolicyTable::from_json_str(POLICIES)
        .and_then(|table| RedactionEngine::new(table, Pseudonymizer::new(strategy)))
    else {
        return;
    };

    let scope = Scope::parse(&input.scope);
    let triples = engine.resolve(&event, &scope);
    let report = engine.anonymize(&mut event, &scope);

    assert_eq!(triples.len(), report.policies_applied().len());
    assert!(event.to_value().is_ok());
});
