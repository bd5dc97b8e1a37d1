use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Action, Namespace};
use crate::identifier::{FullyQualified, FullyQualifiedObligation};

/// Fires an obligation value when `action` touches `attribute_value_fqn`.
///
/// With `client_ids` empty the trigger applies to every caller; otherwise only
/// to the listed policy-enforcement-point clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ObligationTrigger {
    pub action: Action,
    pub attribute_value_fqn: String,
    #[serde(default)]
    pub client_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ObligationValue {
    pub fqn: String,
    pub value: String,
    #[serde(default)]
    pub triggers: Vec<ObligationTrigger>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Obligation {
    pub fqn: String,
    pub namespace: Namespace,
    pub name: String,
    pub values: Vec<ObligationValue>,
}

impl Obligation {
    pub fn new(namespace: &str, name: &str, values: Vec<ObligationValue>) -> Self {
        let namespace = Namespace::new(namespace);
        Obligation {
            fqn: FullyQualifiedObligation::definition(namespace.name.clone(), name).fqn(),
            namespace,
            name: name.to_ascii_lowercase(),
            values,
        }
    }
}

impl ObligationValue {
    pub fn new(namespace: &str, name: &str, value: &str) -> Self {
        ObligationValue {
            fqn: FullyQualifiedObligation::value(namespace, name, value).fqn(),
            value: value.to_ascii_lowercase(),
            triggers: Vec::new(),
        }
    }

    pub fn triggered_by(mut self, action: &str, attribute_value_fqn: &str, client_ids: &[&str]) -> Self {
        self.triggers.push(ObligationTrigger {
            action: Action::new(action),
            attribute_value_fqn: attribute_value_fqn.to_ascii_lowercase(),
            client_ids: client_ids.iter().map(|c| c.to_string()).collect(),
        });
        self
    }
}
