//! Redaction policy documents.
//!
//! A policy file is a JSON object mapping policy names to definitions:
//!
//! ```json
//! {
//!   "src_ip": {"KRE": "^SRC_IP$", "ACTION": "generalization", "TYPE": "ip_address"},
//!   "user":   {"KRE": "^USERNAME", "VRE": ".*", "SRE": "anonymous"}
//! }
//! ```
//!
//! Policies are kept in document order; that order is the order in which
//! they are applied to an event.

use crate::{AnonError, Result};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// One policy entry as written in the policy file.
///
/// `ACTION` and `TYPE` stay as raw strings here so that an unknown spelling
/// is reported against the policy name when the table is compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDefinition {
    /// Key pattern, matched case-insensitively at the start of field names.
    #[serde(rename = "KRE")]
    pub key_pattern: String,

    /// Explicit value pattern (explicit mode only).
    #[serde(rename = "VRE", default, skip_serializing_if = "Option::is_none")]
    pub value_pattern: Option<String>,

    /// Explicit substitution template (explicit mode only).
    #[serde(rename = "SRE", default, skip_serializing_if = "Option::is_none")]
    pub substitution: Option<String>,

    #[serde(rename = "ACTION", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(rename = "TYPE", default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,

    /// Organization scope; overrides the run scope for this policy.
    #[serde(rename = "ORGANIZATION", default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl PolicyDefinition {
    /// Create a definition carrying only a key pattern.
    pub fn new(key_pattern: impl Into<String>) -> Self {
        Self {
            key_pattern: key_pattern.into(),
            value_pattern: None,
            substitution: None,
            action: None,
            type_hint: None,
            organization: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_type(mut self, type_hint: impl Into<String>) -> Self {
        self.type_hint = Some(type_hint.into());
        self
    }

    /// Set the explicit value pattern and substitution.
    pub fn with_explicit(
        mut self,
        value_pattern: impl Into<String>,
        substitution: impl Into<String>,
    ) -> Self {
        self.value_pattern = Some(value_pattern.into());
        self.substitution = Some(substitution.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// The scope this policy is pinned to, if any.
    ///
    /// Compared verbatim against the event's organization; only the exact
    /// wildcard `all` is special.
    pub fn scope(&self) -> Option<Scope> {
        self.organization.as_deref().map(Scope::verbatim)
    }
}

/// Ordered collection of named policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTable {
    entries: Vec<(String, PolicyDefinition)>,
}

impl PolicyTable {
    /// Build a table from named definitions, rejecting duplicate names.
    pub fn new(entries: Vec<(String, PolicyDefinition)>) -> Result<Self> {
        let mut seen = HashSet::new();
        for (name, _) in &entries {
            if !seen.insert(name.as_str()) {
                return Err(AnonError::configuration(name, "duplicate policy name"));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a policy document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let raw: OrderedEntries = serde_json::from_str(s)?;
        let entries = raw
            .0
            .into_iter()
            .map(|(name, value)| {
                let definition: PolicyDefinition = serde_json::from_value(value)
                    .map_err(|e| AnonError::configuration(&name, e.to_string()))?;
                Ok((name, definition))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(entries)
    }

    /// Load a policy document from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Iterate over policies in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PolicyDefinition)> {
        self.entries.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn get(&self, name: &str) -> Option<&PolicyDefinition> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, def)| def)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A JSON object read as an ordered list of entries.
struct OrderedEntries(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping policy names to policy definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, value)) = map.next_entry::<String, serde_json::Value>()? {
                    entries.push((name, value));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// Organization scope gating which events a policy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Wildcard: every event, whatever its organization.
    All,
    /// Only events whose `ORGANIZATION` equals this value.
    Organization(String),
}

impl Scope {
    /// Spelling of the wildcard scope.
    pub const WILDCARD: &'static str = "all";

    /// Parse a scope, normalizing it to lower case.
    ///
    /// The empty string is a real scope: it only admits events with no
    /// organization.
    pub fn parse(s: &str) -> Self {
        let normalized = s.to_lowercase();
        if normalized == Self::WILDCARD {
            Scope::All
        } else {
            Scope::Organization(normalized)
        }
    }

    /// Parse a scope without case folding.
    pub fn verbatim(s: &str) -> Self {
        if s == Self::WILDCARD {
            Scope::All
        } else {
            Scope::Organization(s.to_string())
        }
    }

    /// Whether an event with this organization falls inside the scope.
    pub fn admits(&self, event_organization: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Organization(org) => org == event_organization,
        }
    }
}

impl std::str::FromStr for Scope {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Scope::parse(s))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str(Self::WILDCARD),
            Scope::Organization(org) => f.write_str(org),
        }
    }
}
