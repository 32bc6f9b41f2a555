//! Policy resolution: from policy definitions to concrete redaction triples.
//!
//! Every applicable policy yields exactly one `(key pattern, value pattern,
//! substitution)` triple. Derivation is a pure function of the action, the
//! type hint, the scope and the event's organization.

use crate::{
    Action, AnonError, Event, PolicyDefinition, PolicyTable, Pseudonymizer, Result, Scope,
    TypeHint,
};
use serde::Serialize;
use tracing::{debug, warn};

/// Mask written by suppression.
pub const SUPPRESSION_MASK: &str = "**********";

/// Value pattern matching any value.
pub const MATCH_ANY: &str = ".*";

/// Dotted-quad IPv4 at the end of the value, first two octets captured.
pub const IPV4_TAIL_PATTERN: &str = r"(\d{1,3}\.)(\d{1,3}\.)\d{1,3}\.\d{1,3}$";

/// Keeps the captured leading octets and masks the trailing two.
pub const IP_GENERALIZATION_TEMPLATE: &str = "${1}${2}X.X";

/// Label written by organization generalization.
pub const GENERIC_ORGANIZATION: &str = "organization";

/// Replacement text for a matched value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Substitution {
    /// Expanded against the value pattern's capture groups (`${1}` syntax).
    Template(String),
    /// Inserted verbatim.
    Literal(String),
}

impl Substitution {
    pub fn text(&self) -> &str {
        match self {
            Substitution::Template(s) | Substitution::Literal(s) => s,
        }
    }
}

/// A concrete rewrite rule derived from one policy for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedactionTriple {
    /// Name of the policy this triple came from.
    pub policy: String,
    pub key_pattern: String,
    pub value_pattern: String,
    pub substitution: Substitution,
}

impl RedactionTriple {
    pub fn new(
        policy: impl Into<String>,
        key_pattern: impl Into<String>,
        value_pattern: impl Into<String>,
        substitution: Substitution,
    ) -> Self {
        Self {
            policy: policy.into(),
            key_pattern: key_pattern.into(),
            value_pattern: value_pattern.into(),
            substitution,
        }
    }
}

/// What a validated policy does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedactionKind {
    /// Mask every value.
    Suppress,
    /// Keep the first two octets of a dotted-quad address.
    GeneralizeIp,
    /// Replace the value with a generic organization label.
    GeneralizeOrg,
    /// Replace the value with the event organization's pseudonym.
    PseudonymizeOrg,
    /// Policy-supplied value pattern and (translated) template.
    Explicit {
        value_pattern: String,
        substitution: String,
    },
}

impl RedactionKind {
    /// Validate a definition and classify it.
    pub fn from_definition(name: &str, def: &PolicyDefinition) -> Result<Self> {
        let action = def
            .action
            .as_deref()
            .map(|s| {
                Action::parse_str(s)
                    .ok_or_else(|| AnonError::configuration(name, format!("unknown ACTION '{}'", s)))
            })
            .transpose()?;
        let type_hint = def
            .type_hint
            .as_deref()
            .map(|s| {
                TypeHint::parse_str(s)
                    .ok_or_else(|| AnonError::configuration(name, format!("unknown TYPE '{}'", s)))
            })
            .transpose()?;

        if action.is_some() && (def.value_pattern.is_some() || def.substitution.is_some()) {
            warn!(policy = name, "VRE/SRE ignored because ACTION is set");
        }

        match (action, type_hint) {
            (Some(Action::Suppression), _) => Ok(RedactionKind::Suppress),
            (Some(Action::Generalization), Some(TypeHint::IpAddress)) => {
                Ok(RedactionKind::GeneralizeIp)
            }
            (Some(Action::Generalization), Some(TypeHint::Organization)) => {
                Ok(RedactionKind::GeneralizeOrg)
            }
            (Some(Action::Generalization), None) => Err(AnonError::configuration(
                name,
                "generalization requires TYPE ip_address or organization",
            )),
            (Some(Action::Pseudonymization), Some(TypeHint::Organization)) => {
                Ok(RedactionKind::PseudonymizeOrg)
            }
            (Some(Action::Pseudonymization), _) => Err(AnonError::configuration(
                name,
                "pseudonimization requires TYPE organization",
            )),
            (None, _) => {
                let value_pattern = def.value_pattern.clone().ok_or_else(|| {
                    AnonError::configuration(name, "explicit policy is missing VRE")
                })?;
                let substitution = def.substitution.as_deref().ok_or_else(|| {
                    AnonError::configuration(name, "explicit policy is missing SRE")
                })?;
                Ok(RedactionKind::Explicit {
                    value_pattern,
                    substitution: translate_template(substitution),
                })
            }
        }
    }

    /// Derive the triple for one event.
    pub fn triple(
        &self,
        policy: &str,
        key_pattern: &str,
        organization: &str,
        pseudonymizer: &Pseudonymizer,
    ) -> RedactionTriple {
        let (value_pattern, substitution) = match self {
            RedactionKind::Suppress => (
                MATCH_ANY.to_string(),
                Substitution::Literal(SUPPRESSION_MASK.to_string()),
            ),
            RedactionKind::GeneralizeIp => (
                IPV4_TAIL_PATTERN.to_string(),
                Substitution::Template(IP_GENERALIZATION_TEMPLATE.to_string()),
            ),
            RedactionKind::GeneralizeOrg => (
                MATCH_ANY.to_string(),
                Substitution::Literal(GENERIC_ORGANIZATION.to_string()),
            ),
            RedactionKind::PseudonymizeOrg => (
                MATCH_ANY.to_string(),
                Substitution::Literal(pseudonymizer.pseudonym(organization)),
            ),
            RedactionKind::Explicit {
                value_pattern,
                substitution,
            } => (
                value_pattern.clone(),
                Substitution::Template(substitution.clone()),
            ),
        };
        RedactionTriple::new(policy, key_pattern, value_pattern, substitution)
    }

    /// Value pattern, when it does not depend on the event.
    pub fn static_value_pattern(&self) -> &str {
        match self {
            RedactionKind::Suppress | RedactionKind::GeneralizeOrg | RedactionKind::PseudonymizeOrg => {
                MATCH_ANY
            }
            RedactionKind::GeneralizeIp => IPV4_TAIL_PATTERN,
            RedactionKind::Explicit { value_pattern, .. } => value_pattern,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RedactionKind::Suppress => "suppress",
            RedactionKind::GeneralizeIp => "generalize_ip",
            RedactionKind::GeneralizeOrg => "generalize_org",
            RedactionKind::PseudonymizeOrg => "pseudonymize_org",
            RedactionKind::Explicit { .. } => "explicit",
        }
    }
}

/// Whether a policy gates in an event of this organization.
///
/// A policy's own `ORGANIZATION` wins over the run scope.
pub(crate) fn policy_applies(own: Option<&Scope>, run_scope: &Scope, organization: &str) -> bool {
    match own {
        Some(own) => own.admits(organization),
        None => run_scope.admits(organization),
    }
}

/// Resolve the ordered triples to apply to one event.
///
/// Every policy is validated first, whether or not it applies to this
/// event, so a malformed table never yields a partial triple list.
pub fn resolve_triples(
    table: &PolicyTable,
    event: &Event,
    scope: &Scope,
    pseudonymizer: &Pseudonymizer,
) -> Result<Vec<RedactionTriple>> {
    let kinds = table
        .iter()
        .map(|(name, def)| RedactionKind::from_definition(name, def).map(|kind| (name, def, kind)))
        .collect::<Result<Vec<_>>>()?;

    let organization = event.organization();
    let mut triples = Vec::with_capacity(kinds.len());
    for (name, def, kind) in kinds {
        if !policy_applies(def.scope().as_ref(), scope, organization) {
            debug!(policy = name, organization, "policy out of scope");
            continue;
        }
        triples.push(kind.triple(name, &def.key_pattern, organization, pseudonymizer));
    }
    Ok(triples)
}

/// Translate a backslash-style template (`\1\2X.X`, `\g<name>`) into the
/// regex crate's `${1}` syntax. Literal `$` is escaped.
pub fn translate_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied() {
                        if !d.is_ascii_digit() || group.len() == 2 {
                            break;
                        }
                        group.push(d);
                        chars.next();
                    }
                    out.push_str("${");
                    out.push_str(&group);
                    out.push('}');
                }
                Some('g') => {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek() == Some(&'<') {
                        lookahead.next();
                        let name: String = lookahead.by_ref().take_while(|&ch| ch != '>').collect();
                        out.push_str("${");
                        out.push_str(&name);
                        out.push('}');
                        chars = lookahead;
                    } else {
                        out.push('\\');
                    }
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PseudonymStrategy;

    fn hash_pseudonymizer() -> Pseudonymizer {
        Pseudonymizer::new(PseudonymStrategy::hash())
    }

    fn event_for(org: &str) -> Event {
        [("ORGANIZATION", org), ("SRC_IP", "10.0.0.5")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_suppression_ignores_type_hint() {
        let def = PolicyDefinition::new("^A")
            .with_action("suppression")
            .with_type("ip_address");
        assert_eq!(
            RedactionKind::from_definition("p", &def).unwrap(),
            RedactionKind::Suppress
        );
    }

    #[test]
    fn test_generalization_kinds() {
        let ip = PolicyDefinition::new("^A")
            .with_action("generalization")
            .with_type("ip_address");
        let org = PolicyDefinition::new("^A")
            .with_action("generalization")
            .with_type("organization");
        assert_eq!(
            RedactionKind::from_definition("p", &ip).unwrap(),
            RedactionKind::GeneralizeIp
        );
        assert_eq!(
            RedactionKind::from_definition("p", &org).unwrap(),
            RedactionKind::GeneralizeOrg
        );
    }

    #[test]
    fn test_generalization_without_type_rejected() {
        let def = PolicyDefinition::new("^A").with_action("generalization");
        let err = RedactionKind::from_definition("gen", &def).unwrap_err();
        assert_eq!(err.policy(), Some("gen"));
    }

    #[test]
    fn test_pseudonymization_requires_organization_type() {
        let bad = PolicyDefinition::new("^A")
            .with_action("pseudonimization")
            .with_type("ip_address");
        assert!(RedactionKind::from_definition("p", &bad).is_err());

        let good = PolicyDefinition::new("^A")
            .with_action("pseudonimization")
            .with_type("organization");
        assert_eq!(
            RedactionKind::from_definition("p", &good).unwrap(),
            RedactionKind::PseudonymizeOrg
        );
    }

    #[test]
    fn test_unknown_action_and_type_rejected() {
        let action = PolicyDefinition::new("^A").with_action("obliterate");
        let err = RedactionKind::from_definition("p1", &action).unwrap_err();
        assert!(err.to_string().contains("unknown ACTION 'obliterate'"));

        let hint = PolicyDefinition::new("^A")
            .with_action("generalization")
            .with_type("mac_address");
        let err = RedactionKind::from_definition("p2", &hint).unwrap_err();
        assert!(err.to_string().contains("unknown TYPE 'mac_address'"));
    }

    #[test]
    fn test_explicit_requires_both_patterns() {
        let no_vre = PolicyDefinition {
            substitution: Some("x".into()),
            ..PolicyDefinition::new("^A")
        };
        let err = RedactionKind::from_definition("e", &no_vre).unwrap_err();
        assert!(err.to_string().contains("missing VRE"));

        let no_sre = PolicyDefinition {
            value_pattern: Some(".*".into()),
            ..PolicyDefinition::new("^A")
        };
        let err = RedactionKind::from_definition("e", &no_sre).unwrap_err();
        assert!(err.to_string().contains("missing SRE"));
    }

    #[test]
    fn test_explicit_template_translated() {
        let def = PolicyDefinition::new("IP.*").with_explicit(IPV4_TAIL_PATTERN, r"\1\2X.X");
        let kind = RedactionKind::from_definition("e", &def).unwrap();
        let triple = kind.triple("e", "IP.*", "", &hash_pseudonymizer());
        assert_eq!(triple.value_pattern, IPV4_TAIL_PATTERN);
        assert_eq!(
            triple.substitution,
            Substitution::Template("${1}${2}X.X".to_string())
        );
    }

    #[test]
    fn test_triples_per_kind() {
        let p = Pseudonymizer::new(PseudonymStrategy::pilot_table());

        let t = RedactionKind::Suppress.triple("s", "^K", "csi", &p);
        assert_eq!(t.value_pattern, MATCH_ANY);
        assert_eq!(t.substitution, Substitution::Literal(SUPPRESSION_MASK.into()));

        let t = RedactionKind::GeneralizeOrg.triple("g", "^K", "csi", &p);
        assert_eq!(t.substitution.text(), GENERIC_ORGANIZATION);

        let t = RedactionKind::PseudonymizeOrg.triple("ps", "^K", "csi", &p);
        assert_eq!(t.substitution, Substitution::Literal("pilot1".into()));
        assert_eq!(t.policy, "ps");
        assert_eq!(t.key_pattern, "^K");
    }

    #[test]
    fn test_resolve_respects_run_scope() {
        let table = PolicyTable::from_json_str(
            r#"{"p1": {"KRE": "^SRC_IP$", "ACTION": "suppression"}}"#,
        )
        .unwrap();
        let p = hash_pseudonymizer();

        let hit = resolve_triples(&table, &event_for("hospital"), &Scope::parse("hospital"), &p)
            .unwrap();
        assert_eq!(hit.len(), 1);

        let miss =
            resolve_triples(&table, &event_for("csi"), &Scope::parse("hospital"), &p).unwrap();
        assert!(miss.is_empty());

        let all = resolve_triples(&table, &event_for("csi"), &Scope::All, &p).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_resolve_policy_scope_overrides_run_scope() {
        let table = PolicyTable::from_json_str(
            r#"{
                "everyone": {"KRE": "^A$", "ACTION": "suppression", "ORGANIZATION": "all"},
                "csi_only": {"KRE": "^B$", "ACTION": "suppression", "ORGANIZATION": "csi"}
            }"#,
        )
        .unwrap();
        let p = hash_pseudonymizer();

        let triples =
            resolve_triples(&table, &event_for("db"), &Scope::parse("db"), &p).unwrap();
        let names: Vec<_> = triples.iter().map(|t| t.policy.as_str()).collect();
        assert_eq!(names, vec!["everyone"]);

        let triples =
            resolve_triples(&table, &event_for("csi"), &Scope::parse("db"), &p).unwrap();
        let names: Vec<_> = triples.iter().map(|t| t.policy.as_str()).collect();
        assert_eq!(names, vec!["everyone", "csi_only"]);
    }

    #[test]
    fn test_missing_organization_matches_only_empty_scope() {
        let table = PolicyTable::from_json_str(r#"{"p": {"KRE": "^A$", "ACTION": "suppression"}}"#)
            .unwrap();
        let event: Event = [("A", "x")].into_iter().collect();
        let p = hash_pseudonymizer();

        assert!(resolve_triples(&table, &event, &Scope::parse("csi"), &p)
            .unwrap()
            .is_empty());
        assert_eq!(
            resolve_triples(&table, &event, &Scope::parse(""), &p)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_resolve_rejects_table_with_any_malformed_policy() {
        let table = PolicyTable::from_json_str(
            r#"{
                "good": {"KRE": "^A$", "ACTION": "suppression"},
                "bad": {"KRE": "^B$", "ORGANIZATION": "elsewhere"}
            }"#,
        )
        .unwrap();
        let err = resolve_triples(&table, &event_for("csi"), &Scope::All, &hash_pseudonymizer())
            .unwrap_err();
        assert_eq!(err.policy(), Some("bad"));
    }

    #[test]
    fn test_resolve_preserves_order() {
        let table = PolicyTable::from_json_str(
            r#"{
                "third": {"KRE": "^C$", "ACTION": "suppression"},
                "first": {"KRE": "^A$", "ACTION": "suppression"},
                "second": {"KRE": "^B$", "ACTION": "suppression"}
            }"#,
        )
        .unwrap();
        let triples =
            resolve_triples(&table, &event_for("x"), &Scope::All, &hash_pseudonymizer()).unwrap();
        let names: Vec<_> = triples.iter().map(|t| t.policy.as_str()).collect();
        assert_eq!(names, vec!["third", "first", "second"]);
    }

    #[test]
    fn test_pseudonym_follows_event_organization() {
        let table = PolicyTable::from_json_str(
            r#"{"org": {"KRE": "^ORGANIZATION$", "ACTION": "pseudonimization", "TYPE": "organization"}}"#,
        )
        .unwrap();
        let p = Pseudonymizer::new(PseudonymStrategy::pilot_table());

        let triples = resolve_triples(&table, &event_for("db"), &Scope::All, &p).unwrap();
        assert_eq!(triples[0].substitution, Substitution::Literal("pilot2".into()));

        let triples = resolve_triples(&table, &event_for("nowhere"), &Scope::All, &p).unwrap();
        assert_eq!(
            triples[0].substitution,
            Substitution::Literal("unknown_pilot".into())
        );
    }

    #[test]
    fn test_translate_template() {
        assert_eq!(translate_template(r"\1\2X.X"), "${1}${2}X.X");
        assert_eq!(translate_template("plain"), "plain");
        assert_eq!(translate_template("cost $5"), "cost $$5");
        assert_eq!(translate_template(r"\g<user>@host"), "${user}@host");
        assert_eq!(translate_template(r"a\\b"), r"a\b");
        assert_eq!(translate_template(r"\12x"), "${12}x");
        assert_eq!(translate_template(r"trailing\"), r"trailing\");
        assert_eq!(translate_template(r"\gx"), r"\gx");
    }
}
