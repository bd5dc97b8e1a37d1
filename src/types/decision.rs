//! Decision types: the PDP's detailed results and the caller-facing summaries.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display as StrumDisplay};
use utoipa::ToSchema;

use super::Action;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, AsRefStr, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Permit,
    Deny,
}

impl From<bool> for DecisionKind {
    fn from(passed: bool) -> Self {
        if passed {
            DecisionKind::Permit
        } else {
            DecisionKind::Deny
        }
    }
}

/// Caller-facing outcome for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResourceDecision {
    pub ephemeral_resource_id: String,
    pub decision: DecisionKind,
    pub required_obligations: Vec<String>,
}

/// An action the entity lacks on an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EntitlementFailure {
    pub attribute_value_fqn: String,
    pub action_name: String,
}

/// Outcome of one attribute definition's rule on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DataRuleResult {
    pub attribute_definition_fqn: String,
    pub passed: bool,
    pub resource_value_fqns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entitlement_failures: Vec<EntitlementFailure>,
}

/// Detailed outcome for one resource.
///
/// `passed` is authoritative: `entitled && obligations_satisfied`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResourceResult {
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    pub entitled: bool,
    pub obligations_satisfied: bool,
    pub passed: bool,
    pub data_rule_results: Vec<DataRuleResult>,
    pub required_obligations: Vec<String>,
}

impl ResourceResult {
    pub fn to_resource_decision(&self) -> ResourceDecision {
        ResourceDecision {
            ephemeral_resource_id: self.resource_id.clone(),
            decision: self.passed.into(),
            required_obligations: self.required_obligations.clone(),
        }
    }
}

/// Detailed outcome of one decision over one or more resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Decision {
    /// Advisory roll-up of every result's `passed`.
    #[serde(rename = "access")]
    pub all_permitted: bool,
    pub results: Vec<ResourceResult>,
}

/// Entitlements of one entity: attribute value FQN to the actions it may take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EntityEntitlements {
    pub ephemeral_id: String,
    pub actions_per_attribute_value_fqn: BTreeMap<String, Vec<Action>>,
}

/// Version metadata for a loaded policy text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct PolicyVersion {
    /// SHA-256 of the policy source.
    pub hash: String,
    /// When this policy was loaded, RFC 3339-style seconds since the epoch.
    pub loaded_at: String,
}

impl Display for PolicyVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} @ {}", self.hash, self.loaded_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, passed: bool) -> ResourceResult {
        ResourceResult {
            resource_id: id.to_string(),
            resource_name: None,
            entitled: passed,
            obligations_satisfied: true,
            passed,
            data_rule_results: vec![],
            required_obligations: vec!["https://example.com/obl/drm/value/watermark".to_string()],
        }
    }

    #[test]
    fn test_to_resource_decision() {
        let decision = result("doc-1", false).to_resource_decision();
        assert_eq!(decision.decision, DecisionKind::Deny);
        assert_eq!(decision.ephemeral_resource_id, "doc-1");
        assert_eq!(decision.required_obligations.len(), 1);
    }

    #[test]
    fn test_decision_serializes_access_key() {
        let decision = Decision {
            all_permitted: true,
            results: vec![result("r", true)],
        };
        insta::with_settings!({sort_maps => true}, {
            insta::assert_json_snapshot!(decision, @r#"
            {
              "access": true,
              "results": [
                {
                  "data_rule_results": [],
                  "entitled": true,
                  "obligations_satisfied": true,
                  "passed": true,
                  "required_obligations": [
                    "https://example.com/obl/drm/value/watermark"
                  ],
                  "resource_id": "r"
                }
              ]
            }
            "#);
        });
    }

    #[test]
    fn test_policy_version_display() {
        let version = PolicyVersion {
            hash: "abc123".to_string(),
            loaded_at: "1700000000".to_string(),
        };
        assert_eq!(version.to_string(), "abc123 @ 1700000000");
    }

    #[test]
    fn test_decision_kind_strings() {
        assert_eq!(DecisionKind::Permit.to_string(), "PERMIT");
        assert_eq!(serde_json::to_string(&DecisionKind::Deny).unwrap(), "\"DENY\"");
    }
}
