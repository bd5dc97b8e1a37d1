use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// What a resource is made of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    AttributeValues { fqns: Vec<String> },
    RegisteredResourceValueFqn(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "crate::validation::resource_kind"))]
pub struct Resource {
    #[serde(default)]
    pub ephemeral_id: String,
    #[serde(flatten)]
    pub kind: ResourceKind,
}

impl Resource {
    pub fn attribute_values(ephemeral_id: &str, fqns: &[&str]) -> Self {
        Resource {
            ephemeral_id: ephemeral_id.to_string(),
            kind: ResourceKind::AttributeValues {
                fqns: fqns.iter().map(|f| f.to_string()).collect(),
            },
        }
    }

    pub fn registered(ephemeral_id: &str, fqn: &str) -> Self {
        Resource {
            ephemeral_id: ephemeral_id.to_string(),
            kind: ResourceKind::RegisteredResourceValueFqn(fqn.to_string()),
        }
    }

    /// Lowercase every FQN and assign `resource-<idx>` when the id is empty.
    pub(crate) fn normalized(&self, idx: usize) -> Resource {
        let ephemeral_id = if self.ephemeral_id.is_empty() {
            format!("resource-{idx}")
        } else {
            self.ephemeral_id.clone()
        };
        let kind = match &self.kind {
            ResourceKind::AttributeValues { fqns } => ResourceKind::AttributeValues {
                fqns: fqns.iter().map(|f| f.to_ascii_lowercase()).collect(),
            },
            ResourceKind::RegisteredResourceValueFqn(fqn) => {
                ResourceKind::RegisteredResourceValueFqn(fqn.to_ascii_lowercase())
            }
        };
        Resource { ephemeral_id, kind }
    }
}
