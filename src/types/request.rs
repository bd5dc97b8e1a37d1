//! Request and response shapes of the decision service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::{Action, EntityEntitlements, EntityIdentifier, Resource, ResourceDecision};

/// One entity, one action, one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct GetDecisionRequest {
    #[validate(required, custom(function = "crate::validation::entity_identifier"))]
    pub entity_identifier: Option<EntityIdentifier>,
    #[validate(nested)]
    pub action: Action,
    #[validate(required, nested)]
    pub resource: Option<Resource>,
    #[serde(default)]
    #[validate(length(max = 50), custom(function = "crate::validation::obligation_fqns"))]
    pub fulfillable_obligation_fqns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GetDecisionResponse {
    pub decision: ResourceDecision,
}

/// One entity, one action, many resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct GetDecisionMultiResourceRequest {
    #[validate(required, custom(function = "crate::validation::entity_identifier"))]
    pub entity_identifier: Option<EntityIdentifier>,
    #[validate(nested)]
    pub action: Action,
    #[validate(length(min = 1, max = 1000), nested)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    #[validate(length(max = 50), custom(function = "crate::validation::obligation_fqns"))]
    pub fulfillable_obligation_fqns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GetDecisionMultiResourceResponse {
    /// Advisory. Each `resource_decisions[i]` is authoritative.
    pub all_permitted: bool,
    pub resource_decisions: Vec<ResourceDecision>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct GetDecisionBulkRequest {
    #[validate(length(min = 1, max = 200), nested)]
    pub decision_requests: Vec<GetDecisionMultiResourceRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GetDecisionBulkResponse {
    pub decision_responses: Vec<GetDecisionMultiResourceResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct GetEntitlementsRequest {
    #[validate(required, custom(function = "crate::validation::entity_identifier"))]
    pub entity_identifier: Option<EntityIdentifier>,
    #[serde(default)]
    pub with_comprehensive_hierarchy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GetEntitlementsResponse {
    pub entitlements: Vec<EntityEntitlements>,
}

impl GetEntitlementsResponse {
    /// Union of every entity's entitlements, actions deduplicated.
    pub fn merged(&self) -> BTreeMap<String, Vec<Action>> {
        let mut merged: BTreeMap<String, Vec<Action>> = BTreeMap::new();
        for entity in &self.entitlements {
            for (fqn, actions) in &entity.actions_per_attribute_value_fqn {
                let slot = merged.entry(fqn.clone()).or_default();
                for action in actions {
                    if !slot.contains(action) {
                        slot.push(action.clone());
                    }
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Token;
    use serde_json::json;

    #[test]
    fn test_multi_resource_request_from_json() {
        let req: GetDecisionMultiResourceRequest = serde_json::from_value(json!({
            "entity_identifier": { "token": { "ephemeral_id": "t1", "jwt": "a.b.c" } },
            "action": { "name": "read" },
            "resources": [
                { "ephemeral_id": "r1", "attribute_values": { "fqns": ["https://example.com/attr/relto/value/usa"] } },
                { "registered_resource_value_fqn": "https://reg_res/network/value/internal" }
            ]
        }))
        .unwrap();

        assert_eq!(
            req.entity_identifier,
            Some(EntityIdentifier::Token(Token {
                ephemeral_id: "t1".into(),
                jwt: "a.b.c".into()
            }))
        );
        assert_eq!(req.resources.len(), 2);
        assert_eq!(req.resources[1].ephemeral_id, "");
        assert!(req.fulfillable_obligation_fqns.is_empty());
    }

    #[test]
    fn test_merged_entitlements() {
        let mut first = BTreeMap::new();
        first.insert("https://a.com/attr/x/value/1".to_string(), vec![Action::new("read")]);
        let mut second = BTreeMap::new();
        second.insert(
            "https://a.com/attr/x/value/1".to_string(),
            vec![Action::new("READ"), Action::new("update")],
        );
        let resp = GetEntitlementsResponse {
            entitlements: vec![
                EntityEntitlements {
                    ephemeral_id: "a".into(),
                    actions_per_attribute_value_fqn: first,
                },
                EntityEntitlements {
                    ephemeral_id: "b".into(),
                    actions_per_attribute_value_fqn: second,
                },
            ],
        };
        let merged = resp.merged();
        assert_eq!(
            merged["https://a.com/attr/x/value/1"],
            vec![Action::new("read"), Action::new("update")]
        );
    }
}
