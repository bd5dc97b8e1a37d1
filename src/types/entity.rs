//! Entities whose entitlements are being asked about.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display};
use utoipa::ToSchema;
use validator::Validate;

/// A signed JWT standing for the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
pub struct Token {
    #[serde(default)]
    pub ephemeral_id: String,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub jwt: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, AsRefStr, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityCategory {
    #[default]
    Unspecified,
    Subject,
    Environment,
}

/// The typed identity carried by one entity of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    EmailAddress(String),
    UserName(String),
    ClientId(String),
    /// Arbitrary claims, e.g. from an upstream identity provider.
    Claims(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Entity {
    #[serde(default)]
    pub ephemeral_id: String,
    #[serde(default)]
    pub category: EntityCategory,
    pub kind: EntityKind,
}

impl Entity {
    pub fn subject(ephemeral_id: &str, kind: EntityKind) -> Self {
        Entity {
            ephemeral_id: ephemeral_id.to_string(),
            category: EntityCategory::Subject,
            kind,
        }
    }

    pub fn environment(ephemeral_id: &str, kind: EntityKind) -> Self {
        Entity {
            ephemeral_id: ephemeral_id.to_string(),
            category: EntityCategory::Environment,
            kind,
        }
    }

    pub fn is_environment(&self) -> bool {
        self.category == EntityCategory::Environment
    }
}

/// An ordered composite principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct EntityChain {
    #[serde(default)]
    pub ephemeral_id: String,
    #[validate(length(min = 1, max = 10))]
    pub entities: Vec<Entity>,
}

/// Exactly one way of naming the entity of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityIdentifier {
    Token(Token),
    EntityChain(EntityChain),
    RegisteredResourceValueFqn(String),
    /// Reuse the token the interceptor verified. Only `true` is meaningful.
    UseRequestToken(bool),
}

impl EntityIdentifier {
    pub fn kind_name(&self) -> &'static str {
        match self {
            EntityIdentifier::Token(_) => "token",
            EntityIdentifier::EntityChain(_) => "entity_chain",
            EntityIdentifier::RegisteredResourceValueFqn(_) => "registered_resource_value_fqn",
            EntityIdentifier::UseRequestToken(_) => "use_request_token",
        }
    }
}

/// An entitlement granted to a representation without any subject mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DirectEntitlement {
    pub attribute_value_fqn: String,
    pub actions: Vec<String>,
}

/// The resolved form of one entity: JSON property bags evaluated by subject
/// mappings, plus optional direct entitlements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRepresentation {
    pub original_id: String,
    pub additional_props: Vec<Map<String, Value>>,
    #[serde(default)]
    pub direct_entitlements: Vec<DirectEntitlement>,
}

impl EntityRepresentation {
    pub fn new(original_id: impl Into<String>, props: Value) -> Self {
        let additional_props = match props {
            Value::Object(map) => vec![map],
            _ => Vec::new(),
        };
        EntityRepresentation {
            original_id: original_id.into(),
            additional_props,
            direct_entitlements: Vec::new(),
        }
    }

    pub fn with_direct_entitlement(mut self, fqn: &str, actions: &[&str]) -> Self {
        self.direct_entitlements.push(DirectEntitlement {
            attribute_value_fqn: fqn.to_ascii_lowercase(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        });
        self
    }
}
