use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Action;
use crate::identifier::{FullyQualified, FullyQualifiedRegisteredResourceValue};

/// An action bound to an attribute value on a registered resource value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ActionAttributeValue {
    pub action: Action,
    pub attribute_value_fqn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegisteredResourceValue {
    pub fqn: String,
    pub value: String,
    #[serde(default)]
    pub action_attribute_values: Vec<ActionAttributeValue>,
}

impl RegisteredResourceValue {
    /// Attribute value FQNs bound to `action`, deduplicated, in binding order.
    pub fn attribute_values_for(&self, action: &Action) -> Vec<String> {
        let mut fqns: Vec<String> = Vec::new();
        for aav in &self.action_attribute_values {
            if !aav.action.matches(action.name()) {
                continue;
            }
            let fqn = aav.attribute_value_fqn.to_ascii_lowercase();
            if !fqns.contains(&fqn) {
                fqns.push(fqn);
            }
        }
        fqns
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegisteredResource {
    pub name: String,
    pub values: Vec<RegisteredResourceValue>,
}

impl RegisteredResource {
    /// Build a resource whose values get canonical FQNs. Each value comes with
    /// its `(action, attribute value FQN)` bindings.
    pub fn new(name: &str, values: Vec<(&str, Vec<(&str, &str)>)>) -> Self {
        let values = values
            .into_iter()
            .map(|(value, bindings)| RegisteredResourceValue {
                fqn: FullyQualifiedRegisteredResourceValue::new(name, value).fqn(),
                value: value.to_ascii_lowercase(),
                action_attribute_values: bindings
                    .into_iter()
                    .map(|(action, fqn)| ActionAttributeValue {
                        action: Action::new(action),
                        attribute_value_fqn: fqn.to_ascii_lowercase(),
                    })
                    .collect(),
            })
            .collect();
        RegisteredResource {
            name: name.to_ascii_lowercase(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_values_for_action() {
        let rr = RegisteredResource::new(
            "network",
            vec![(
                "internal",
                vec![
                    ("read", "https://example.com/attr/classification/value/s"),
                    ("READ", "https://example.com/attr/classification/value/s"),
                    ("read", "https://example.com/attr/relto/value/usa"),
                    ("create", "https://example.com/attr/classification/value/ts"),
                ],
            )],
        );
        let value = &rr.values[0];
        assert_eq!(value.fqn, "https://reg_res/network/value/internal");
        assert_eq!(
            value.attribute_values_for(&Action::new("Read")),
            vec![
                "https://example.com/attr/classification/value/s",
                "https://example.com/attr/relto/value/usa",
            ]
        );
        assert!(value.attribute_values_for(&Action::new("delete")).is_empty());
    }
}
