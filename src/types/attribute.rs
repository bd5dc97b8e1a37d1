//! Attribute namespaces, definitions and values.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::identifier::{FullyQualified, FullyQualifiedAttribute};

/// How the values of a definition combine when a resource carries several.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeRule {
    #[default]
    Unspecified,
    AllOf,
    AnyOf,
    Hierarchy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Namespace {
    pub name: String,
    pub fqn: String,
    #[serde(default = "active_default")]
    pub active: bool,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into().to_ascii_lowercase();
        let fqn = FullyQualifiedAttribute::namespace_only(name.clone()).fqn();
        Namespace {
            name,
            fqn,
            active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AttributeValue {
    pub fqn: String,
    pub value: String,
    #[serde(default = "active_default")]
    pub active: bool,
}

/// An attribute definition with its ordered values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Attribute {
    pub fqn: String,
    pub namespace: Namespace,
    pub name: String,
    pub rule: AttributeRule,
    pub values: Vec<AttributeValue>,
    #[serde(default = "active_default")]
    pub active: bool,
}

fn active_default() -> bool {
    true
}

impl Attribute {
    /// Build an active definition whose values get canonical FQNs.
    pub fn new(namespace: &str, name: &str, rule: AttributeRule, values: &[&str]) -> Self {
        let namespace = Namespace::new(namespace);
        let fqn = FullyQualifiedAttribute::definition(namespace.name.clone(), name).fqn();
        let values = values
            .iter()
            .map(|value| AttributeValue {
                fqn: FullyQualifiedAttribute::value(namespace.name.clone(), name, *value).fqn(),
                value: value.to_ascii_lowercase(),
                active: true,
            })
            .collect();
        Attribute {
            fqn,
            namespace,
            name: name.to_ascii_lowercase(),
            rule,
            values,
            active: true,
        }
    }

    /// Active in itself and under an active namespace.
    pub fn is_active(&self) -> bool {
        self.active && self.namespace.active
    }

    /// Position of a value FQN in the definition's order (0 is highest precedence).
    pub fn value_index(&self, value_fqn: &str) -> Option<usize> {
        self.values
            .iter()
            .position(|v| v.fqn.eq_ignore_ascii_case(value_fqn))
    }

    pub fn value_fqns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.fqn.as_str())
    }
}
