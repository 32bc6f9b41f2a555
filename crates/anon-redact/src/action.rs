//! Anonymization actions and type hints.

use serde::{Deserialize, Serialize};

/// Action named by a policy's `ACTION` field.
///
/// A policy without an action runs in explicit mode, using its own
/// `VRE`/`SRE` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Replace the value with a fixed mask.
    Suppression,
    /// Coarsen the value (partial IP, generic organization label).
    Generalization,
    /// Replace the value with a stable organization pseudonym.
    #[serde(rename = "pseudonimization", alias = "pseudonymization")]
    Pseudonymization,
}

impl Action {
    /// Parse an action from its policy-file spelling.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "suppression" => Some(Action::Suppression),
            "generalization" => Some(Action::Generalization),
            "pseudonimization" | "pseudonymization" => Some(Action::Pseudonymization),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Suppression => "suppression",
            Action::Generalization => "generalization",
            Action::Pseudonymization => "pseudonimization",
        };
        write!(f, "{}", s)
    }
}

/// Qualifier refining what an action does (`TYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeHint {
    /// Dotted-quad IPv4 address.
    IpAddress,
    /// Organization identifier.
    Organization,
}

impl TypeHint {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "ip_address" => Some(TypeHint::IpAddress),
            "organization" => Some(TypeHint::Organization),
            _ => None,
        }
    }
}

impl std::fmt::Display for TypeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TypeHint::IpAddress => "ip_address",
            TypeHint::Organization => "organization",
        };
        write!(f, "{}", s)
    }
}
