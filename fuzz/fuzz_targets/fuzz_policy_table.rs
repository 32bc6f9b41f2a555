//! Fuzz target for policy table parsing and compilation.
//!
//! Arbitrary input must be rejected with an error, never a panic, whether
//! it fails as JSON, as a policy definition, or as a regular expression.

#![no_main]

use anon_redact::{PolicyStore, PolicyTable};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(table) = PolicyTable::from_json_str(text) {
        let _ = PolicyStore::new(table);
    }
});
