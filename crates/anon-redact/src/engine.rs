//! Redaction engine.
//!
//! Applies concrete triples to an event tree. A field whose name matches the
//! key pattern is rewritten when the start of its value matches the value
//! pattern; every match in the value is then substituted. Any other record
//! or list is descended into. Each field's outcome depends only
//! on its own name and value, so the (lexicographic) iteration order never
//! changes the result.

use crate::resolve::{policy_applies, RedactionKind, RedactionTriple, Substitution};
use crate::{AnonError, Event, FieldValue, PolicyTable, Pseudonymizer, Result, Scope};
use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, trace};

/// Sentinel written into null fields claimed by a key pattern.
pub const NO_DATA: &str = "NoData";

/// A triple with both patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledTriple {
    policy: String,
    key: Regex,
    value: ValuePattern,
    substitution: Substitution,
}

impl CompiledTriple {
    /// Compile a triple's patterns.
    pub fn compile(triple: &RedactionTriple) -> Result<Self> {
        Ok(Self {
            policy: triple.policy.clone(),
            key: compile_key_pattern(&triple.policy, &triple.key_pattern)?,
            value: compile_value_pattern(&triple.policy, &triple.value_pattern)?,
            substitution: triple.substitution.clone(),
        })
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// Case-insensitive match at the start of a field name.
    pub fn key_matches(&self, field: &str) -> bool {
        self.key.is_match(field)
    }

    /// Rewrite a value whose start matches the value pattern.
    ///
    /// Every non-overlapping match in the value is substituted, not only the
    /// leading one. Returns `None` when the start of the value does not match.
    pub fn rewrite(&self, value: &str) -> Option<String> {
        if !self.value.gate.is_match(value) {
            return None;
        }
        let out = match &self.substitution {
            Substitution::Template(template) => self.value.all.replace_all(value, template.as_str()),
            Substitution::Literal(text) => self.value.all.replace_all(value, NoExpand(text)),
        };
        Some(out.into_owned())
    }
}

/// A value pattern compiled twice: anchored to gate the rewrite, unanchored
/// to substitute every occurrence.
#[derive(Debug, Clone)]
struct ValuePattern {
    gate: Regex,
    all: Regex,
}

fn compile_key_pattern(policy: &str, pattern: &str) -> Result<Regex> {
    RegexBuilder::new(&format!("^(?:{})", pattern))
        .case_insensitive(true)
        .build()
        .map_err(|e| AnonError::PolicyCompilation {
            policy: policy.to_string(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn compile_value_pattern(policy: &str, pattern: &str) -> Result<ValuePattern> {
    let compile = |source: &str| {
        Regex::new(source).map_err(|e| AnonError::PolicyCompilation {
            policy: policy.to_string(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
    };
    Ok(ValuePattern {
        gate: compile(&format!("^(?:{})", pattern))?,
        all: compile(pattern)?,
    })
}

/// Apply one compiled triple to an event, recursing through sub-events.
///
/// Returns the number of fields whose value changed.
pub fn apply_triple(event: &mut Event, triple: &CompiledTriple) -> usize {
    let mut changed = 0;
    for (field, value) in event.fields_mut() {
        if triple.key_matches(field) {
            if rewrite_field(triple, field, value) {
                changed += 1;
            }
        } else {
            changed += descend(value, triple);
        }
    }
    changed
}

/// Compile a triple and apply it.
///
/// Patterns are compiled before the event is touched, so an invalid pattern
/// leaves the event unmodified.
pub fn compile_and_apply(event: &mut Event, triple: &RedactionTriple) -> Result<usize> {
    let compiled = CompiledTriple::compile(triple)?;
    Ok(apply_triple(event, &compiled))
}

fn descend(value: &mut FieldValue, triple: &CompiledTriple) -> usize {
    match value {
        FieldValue::Record(inner) => apply_triple(inner, triple),
        FieldValue::List(items) => items.iter_mut().map(|item| descend(item, triple)).sum(),
        FieldValue::Null | FieldValue::Bool(_) | FieldValue::Number(_) | FieldValue::Text(_) => 0,
    }
}

fn rewrite_field(triple: &CompiledTriple, field: &str, value: &mut FieldValue) -> bool {
    let mut changed = false;
    if matches!(value, FieldValue::Null) {
        *value = FieldValue::Text(NO_DATA.to_string());
        changed = true;
    }

    let replacement = match value.scalar_text() {
        Some(text) => match triple.rewrite(&text) {
            Some(new) if new != text => Some(new),
            _ => None,
        },
        None => {
            debug!(
                policy = triple.policy(),
                field, "key matched a record or list; left untouched"
            );
            None
        }
    };

    if let Some(new) = replacement {
        trace!(policy = triple.policy(), field, "field rewritten");
        *value = FieldValue::Text(new);
        changed = true;
    }
    changed
}

/// A policy validated and compiled once at load.
#[derive(Debug, Clone)]
struct CompiledPolicy {
    name: String,
    key_pattern: String,
    kind: RedactionKind,
    /// The policy's own `ORGANIZATION`, overriding the run scope.
    scope: Option<Scope>,
    key: Regex,
    value: ValuePattern,
}

/// Read-only store of validated, pre-compiled policies.
///
/// Loading is all-or-nothing: one malformed policy or invalid pattern
/// rejects the whole table, before any event is processed.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    table: PolicyTable,
    policies: Vec<CompiledPolicy>,
}

impl PolicyStore {
    pub fn new(table: PolicyTable) -> Result<Self> {
        let policies = table
            .iter()
            .map(|(name, def)| {
                let kind = RedactionKind::from_definition(name, def)?;
                let key = compile_key_pattern(name, &def.key_pattern)?;
                let value = compile_value_pattern(name, kind.static_value_pattern())?;
                Ok(CompiledPolicy {
                    name: name.to_string(),
                    key_pattern: def.key_pattern.clone(),
                    kind,
                    scope: def.scope(),
                    key,
                    value,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { table, policies })
    }

    /// Load and compile a policy file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(PolicyTable::load(path)?)
    }

    pub fn table(&self) -> &PolicyTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Applicable policies for an organization, in table order.
    fn applicable<'a>(
        &'a self,
        scope: &'a Scope,
        organization: &'a str,
    ) -> impl Iterator<Item = (&'a CompiledPolicy, bool)> + 'a {
        self.policies.iter().map(move |policy| {
            let applies = policy_applies(policy.scope.as_ref(), scope, organization);
            (policy, applies)
        })
    }
}

/// Outcome of one policy on one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub policy: String,
    /// Whether the policy was in scope for the event.
    pub applied: bool,
    /// Fields whose value changed.
    pub fields_rewritten: usize,
}

/// Summary of one anonymization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizationReport {
    /// Organization read from the event before any rewrite.
    pub organization: String,
    pub outcomes: Vec<PolicyOutcome>,
}

impl AnonymizationReport {
    /// Names of the policies that were in scope.
    pub fn policies_applied(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.applied)
            .map(|o| o.policy.as_str())
            .collect()
    }

    pub fn fields_rewritten(&self) -> usize {
        self.outcomes.iter().map(|o| o.fields_rewritten).sum()
    }
}

/// The anonymization engine.
///
/// Immutable once built; share it behind an `Arc` across workers, each
/// worker owning the events it anonymizes.
#[derive(Debug, Clone)]
pub struct RedactionEngine {
    store: PolicyStore,
    pseudonymizer: Pseudonymizer,
}

impl RedactionEngine {
    /// Validate and compile a policy table.
    pub fn new(table: PolicyTable, pseudonymizer: Pseudonymizer) -> Result<Self> {
        Ok(Self::with_store(PolicyStore::new(table)?, pseudonymizer))
    }

    pub fn with_store(store: PolicyStore, pseudonymizer: Pseudonymizer) -> Self {
        Self {
            store,
            pseudonymizer,
        }
    }

    /// Load an engine from a policy file.
    pub fn load<P: AsRef<Path>>(policy_path: P, pseudonymizer: Pseudonymizer) -> Result<Self> {
        Ok(Self::with_store(PolicyStore::load(policy_path)?, pseudonymizer))
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn pseudonymizer(&self) -> &Pseudonymizer {
        &self.pseudonymizer
    }

    pub fn policy_count(&self) -> usize {
        self.store.len()
    }

    /// The triples that would be applied to this event, in order.
    pub fn resolve(&self, event: &Event, scope: &Scope) -> Vec<RedactionTriple> {
        let organization = event.organization();
        self.store
            .applicable(scope, organization)
            .filter(|(_, applies)| *applies)
            .map(|(policy, _)| {
                policy.kind.triple(
                    &policy.name,
                    &policy.key_pattern,
                    organization,
                    &self.pseudonymizer,
                )
            })
            .collect()
    }

    /// Anonymize an event in place.
    ///
    /// Triples are resolved against the event as received, then applied in
    /// policy order. A later policy may rewrite a field an earlier one
    /// already rewrote.
    pub fn anonymize(&self, event: &mut Event, scope: &Scope) -> AnonymizationReport {
        let organization = event.organization().to_string();

        let plan: Vec<(String, Option<CompiledTriple>)> = self
            .store
            .applicable(scope, &organization)
            .map(|(policy, applies)| {
                let compiled = applies.then(|| CompiledTriple {
                    policy: policy.name.clone(),
                    key: policy.key.clone(),
                    value: policy.value.clone(),
                    substitution: policy
                        .kind
                        .triple(&policy.name, &policy.key_pattern, &organization, &self.pseudonymizer)
                        .substitution,
                });
                (policy.name.clone(), compiled)
            })
            .collect();

        let outcomes = plan
            .into_iter()
            .map(|(policy, compiled)| match compiled {
                Some(triple) => {
                    let fields_rewritten = apply_triple(event, &triple);
                    debug!(policy = %policy, fields_rewritten, "policy applied");
                    PolicyOutcome {
                        policy,
                        applied: true,
                        fields_rewritten,
                    }
                }
                None => {
                    debug!(policy = %policy, organization = %organization, "policy out of scope");
                    PolicyOutcome {
                        policy,
                        applied: false,
                        fields_rewritten: 0,
                    }
                }
            })
            .collect();

        AnonymizationReport {
            organization,
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{IPV4_TAIL_PATTERN, IP_GENERALIZATION_TEMPLATE, MATCH_ANY, SUPPRESSION_MASK};
    use crate::{PolicyDefinition, PseudonymStrategy};
    use serde_json::json;

    fn triple(key: &str, value: &str, substitution: Substitution) -> CompiledTriple {
        CompiledTriple::compile(&RedactionTriple::new("t", key, value, substitution)).unwrap()
    }

    fn suppress(key: &str) -> CompiledTriple {
        triple(key, MATCH_ANY, Substitution::Literal(SUPPRESSION_MASK.into()))
    }

    fn generalize_ip(key: &str) -> CompiledTriple {
        triple(
            key,
            IPV4_TAIL_PATTERN,
            Substitution::Template(IP_GENERALIZATION_TEMPLATE.into()),
        )
    }

    fn event(value: serde_json::Value) -> Event {
        Event::from_value(value).unwrap()
    }

    #[test]
    fn test_key_match_is_case_insensitive_prefix() {
        let t = suppress("src_ip");
        assert!(t.key_matches("SRC_IP"));
        assert!(t.key_matches("src_ip_v6"));
        assert!(!t.key_matches("X_SRC_IP"));
    }

    #[test]
    fn test_value_match_is_prefix() {
        let t = triple("^A$", "10\\.", Substitution::Literal("X.".into()));
        assert_eq!(t.rewrite("10.1.2.3").as_deref(), Some("X.1.2.3"));
        assert_eq!(t.rewrite("110.1.2.3"), None);
    }

    #[test]
    fn test_suppression_masks_value() {
        let mut e = event(json!({"SRC_IP": "10.0.0.5", "DST_IP": "10.0.0.6"}));
        let n = apply_triple(&mut e, &suppress("^SRC_IP$"));
        assert_eq!(n, 1);
        assert_eq!(e.get_text("SRC_IP"), Some(SUPPRESSION_MASK));
        assert_eq!(e.get_text("DST_IP"), Some("10.0.0.6"));
    }

    #[test]
    fn test_null_becomes_no_data_then_masked() {
        let mut e = event(json!({"USERNAME": null}));
        apply_triple(&mut e, &suppress("^USERNAME$"));
        assert_eq!(e.get_text("USERNAME"), Some(SUPPRESSION_MASK));
    }

    #[test]
    fn test_null_becomes_no_data_even_without_value_match() {
        let mut e = event(json!({"SRC_IP": null}));
        let n = apply_triple(&mut e, &generalize_ip("^SRC_IP$"));
        assert_eq!(n, 1);
        assert_eq!(e.get_text("SRC_IP"), Some(NO_DATA));
    }

    #[test]
    fn test_ip_generalization() {
        let mut e = event(json!({"DST_IP": "192.168.1.42"}));
        apply_triple(&mut e, &generalize_ip("^DST_IP$"));
        assert_eq!(e.to_value().unwrap(), json!({"DST_IP": "192.168.X.X"}));
    }

    #[test]
    fn test_ip_generalization_leaves_non_ip_untouched() {
        let mut e = event(json!({"DST_IP": "fe80::1", "SRC_IP": "host-1.2.3.4"}));
        let n = apply_triple(&mut e, &generalize_ip("^(DST|SRC)_IP$"));
        assert_eq!(n, 0);
        assert_eq!(e.get_text("DST_IP"), Some("fe80::1"));
        assert_eq!(e.get_text("SRC_IP"), Some("host-1.2.3.4"));
    }

    #[test]
    fn test_ip_generalization_is_stable_on_second_pass() {
        let mut e = event(json!({"SRC_IP": "10.20.30.40"}));
        let t = generalize_ip("^SRC_IP$");
        assert_eq!(apply_triple(&mut e, &t), 1);
        assert_eq!(apply_triple(&mut e, &t), 0);
        assert_eq!(e.get_text("SRC_IP"), Some("10.20.X.X"));
    }

    #[test]
    fn test_numbers_and_bools_matched_as_text() {
        let mut e = event(json!({"SRC_PORT": 8080, "FLAG": true, "OTHER": 7}));
        apply_triple(&mut e, &suppress("^(SRC_PORT|FLAG)$"));
        assert_eq!(e.get_text("SRC_PORT"), Some(SUPPRESSION_MASK));
        assert_eq!(e.get_text("FLAG"), Some(SUPPRESSION_MASK));
        assert_eq!(e.to_value().unwrap()["OTHER"], json!(7));
    }

    #[test]
    fn test_key_matched_record_left_untouched() {
        let original = json!({"SRC": {"SRC_IP": "10.0.0.5"}});
        let mut e = event(original.clone());
        let n = apply_triple(&mut e, &suppress("^SRC"));
        assert_eq!(n, 0);
        assert_eq!(e.to_value().unwrap(), original);
    }

    #[test]
    fn test_recursion_into_records_and_lists() {
        let mut e = event(json!({
            "SRC_IP": "10.1.2.3",
            "RELATED_EVENTS_INFO": {
                "a": {"SRC_IP": "10.4.5.6"},
                "b": [
                    {"SRC_IP": "10.7.8.9"},
                    {"SRC_IP": "10.7.8.10", "deeper": [[{"SRC_IP": "10.9.9.9"}]]}
                ],
                "SRC_IP": "10.0.0.1"
            }
        }));
        let n = apply_triple(&mut e, &generalize_ip("^SRC_IP$"));
        assert_eq!(n, 6);
        assert_eq!(
            e.to_value().unwrap(),
            json!({
                "SRC_IP": "10.1.X.X",
                "RELATED_EVENTS_INFO": {
                    "a": {"SRC_IP": "10.4.X.X"},
                    "b": [
                        {"SRC_IP": "10.7.X.X"},
                        {"SRC_IP": "10.7.X.X", "deeper": [[{"SRC_IP": "10.9.X.X"}]]}
                    ],
                    "SRC_IP": "10.0.X.X"
                }
            })
        );
    }

    #[test]
    fn test_unbounded_depth() {
        let mut value = json!({"SECRET": "x"});
        for _ in 0..50 {
            value = json!({"nested": value});
        }
        let mut e = event(value);
        assert_eq!(apply_triple(&mut e, &suppress("^SECRET$")), 1);

        let mut cursor = e.to_value().unwrap();
        while let Some(inner) = cursor.get("nested").cloned() {
            cursor = inner;
        }
        assert_eq!(cursor, json!({"SECRET": SUPPRESSION_MASK}));
    }

    #[test]
    fn test_template_captures_and_remainder() {
        let t = triple(
            "^EMAIL$",
            r"([^@]+)@",
            Substitution::Template("user-${1}@".into()),
        );
        assert_eq!(t.rewrite("bob@example.org").as_deref(), Some("user-bob@example.org"));
    }

    #[test]
    fn test_literal_substitution_not_expanded() {
        let t = triple("^A$", MATCH_ANY, Substitution::Literal("$1 cash".into()));
        assert_eq!(t.rewrite("anything").as_deref(), Some("$1 cash"));
    }

    #[test]
    fn test_every_match_substituted() {
        let mut e = event(json!({"PIN": "123abc", "CODE": "abc123"}));
        let t = triple("^(PIN|CODE)$", "[0-9]", Substitution::Literal("X".into()));
        assert_eq!(apply_triple(&mut e, &t), 1);
        assert_eq!(e.get_text("PIN"), Some("XXXabc"));
        assert_eq!(e.get_text("CODE"), Some("abc123"));

        let digits = triple("^A$", r"(\d)", Substitution::Template("<${1}>".into()));
        assert_eq!(digits.rewrite("1a2").as_deref(), Some("<1>a<2>"));
    }

    #[test]
    fn test_suppression_yields_single_mask() {
        let t = suppress("^A$");
        assert_eq!(t.rewrite("secret").as_deref(), Some(SUPPRESSION_MASK));
        assert_eq!(t.rewrite("").as_deref(), Some(SUPPRESSION_MASK));
    }

    #[test]
    fn test_invalid_pattern_leaves_event_untouched() {
        let mut e = event(json!({"A": "value"}));
        let bad_value = RedactionTriple::new("broken", "^A$", "(unclosed", Substitution::Literal("x".into()));
        let err = compile_and_apply(&mut e, &bad_value).unwrap_err();
        assert!(matches!(err, AnonError::PolicyCompilation { ref policy, .. } if policy == "broken"));
        assert_eq!(e.get_text("A"), Some("value"));

        let bad_key = RedactionTriple::new("broken", "[", MATCH_ANY, Substitution::Literal("x".into()));
        assert!(compile_and_apply(&mut e, &bad_key).is_err());
        assert_eq!(e.get_text("A"), Some("value"));
    }

    #[test]
    fn test_store_rejects_invalid_key_pattern() {
        let table = PolicyTable::new(vec![
            ("ok".into(), PolicyDefinition::new("^A$").with_action("suppression")),
            ("bad".into(), PolicyDefinition::new("(").with_action("suppression")),
        ])
        .unwrap();
        let err = PolicyStore::new(table).unwrap_err();
        assert!(matches!(err, AnonError::PolicyCompilation { ref policy, .. } if policy == "bad"));
    }

    #[test]
    fn test_store_rejects_invalid_explicit_value_pattern() {
        let table = PolicyTable::new(vec![(
            "bad".into(),
            PolicyDefinition::new("^A$").with_explicit("[z-a]", "x"),
        )])
        .unwrap();
        assert!(PolicyStore::new(table).is_err());
    }

    #[test]
    fn test_engine_end_to_end_suppression() {
        let table = PolicyTable::from_json_str(r#"{"p1": {"KRE": "^SRC_IP$", "ACTION": "suppression"}}"#)
            .unwrap();
        let engine = RedactionEngine::new(table, Pseudonymizer::default()).unwrap();

        let mut e = event(json!({"ORGANIZATION": "hospital", "SRC_IP": "10.0.0.5"}));
        let report = engine.anonymize(&mut e, &Scope::parse("hospital"));

        assert_eq!(
            e.to_value().unwrap(),
            json!({"ORGANIZATION": "hospital", "SRC_IP": "**********"})
        );
        assert_eq!(report.organization, "hospital");
        assert_eq!(report.policies_applied(), vec!["p1"]);
        assert_eq!(report.fields_rewritten(), 1);
    }

    #[test]
    fn test_engine_out_of_scope_event_untouched() {
        let table = PolicyTable::from_json_str(r#"{"p1": {"KRE": "^SRC_IP$", "ACTION": "suppression"}}"#)
            .unwrap();
        let engine = RedactionEngine::new(table, Pseudonymizer::default()).unwrap();

        let original = json!({"ORGANIZATION": "csi", "SRC_IP": "10.0.0.5"});
        let mut e = event(original.clone());
        let report = engine.anonymize(&mut e, &Scope::parse("hospital"));

        assert_eq!(e.to_value().unwrap(), original);
        assert!(report.policies_applied().is_empty());
        assert_eq!(report.outcomes.len(), 1);
        assert!(!report.outcomes[0].applied);
    }

    #[test]
    fn test_scope_is_read_before_rewrites() {
        // Pseudonymizing ORGANIZATION first must not knock later policies out of scope.
        let table = PolicyTable::from_json_str(
            r#"{
                "org": {"KRE": "^ORGANIZATION$", "ACTION": "pseudonimization", "TYPE": "organization"},
                "ip": {"KRE": "^SRC_IP$", "ACTION": "suppression"}
            }"#,
        )
        .unwrap();
        let engine =
            RedactionEngine::new(table, Pseudonymizer::new(PseudonymStrategy::pilot_table())).unwrap();

        let mut e = event(json!({"ORGANIZATION": "csi", "SRC_IP": "10.0.0.5"}));
        let report = engine.anonymize(&mut e, &Scope::parse("csi"));

        assert_eq!(
            e.to_value().unwrap(),
            json!({"ORGANIZATION": "pilot1", "SRC_IP": "**********"})
        );
        assert_eq!(report.policies_applied(), vec!["org", "ip"]);
    }

    #[test]
    fn test_resolve_matches_free_function() {
        let json = r#"{
            "a": {"KRE": "^A$", "ACTION": "suppression"},
            "b": {"KRE": "^B$", "ACTION": "generalization", "TYPE": "ip_address", "ORGANIZATION": "csi"},
            "c": {"KRE": "^C$", "VRE": "(x)", "SRE": "\\1y"}
        }"#;
        let table = PolicyTable::from_json_str(json).unwrap();
        let engine = RedactionEngine::new(table.clone(), Pseudonymizer::default()).unwrap();
        let e = event(json!({"ORGANIZATION": "db"}));
        let scope = Scope::All;

        let via_engine = engine.resolve(&e, &scope);
        let via_fn =
            crate::resolve_triples(&table, &e, &scope, engine.pseudonymizer()).unwrap();
        assert_eq!(via_engine, via_fn);
        assert_eq!(via_engine.len(), 2);
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedactionEngine>();
    }
}
