//! Subject mappings: which entities bear an attribute value, and for which actions.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::{Action, AttributeValue};

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
pub enum ConditionOperator {
    #[default]
    Unspecified,
    In,
    NotIn,
    InContains,
}

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
pub enum BooleanOperator {
    #[default]
    Unspecified,
    And,
    Or,
}

/// One comparison of a claim selector against a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Condition {
    /// Dot-notation path into the entity, e.g. `realm_access.roles`.
    pub subject_external_selector_value: String,
    pub operator: ConditionOperator,
    pub subject_external_values: Vec<String>,
}

impl Condition {
    pub fn new(selector: &str, operator: ConditionOperator, values: &[&str]) -> Self {
        Condition {
            subject_external_selector_value: selector.to_string(),
            operator,
            subject_external_values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ConditionGroup {
    pub boolean_operator: BooleanOperator,
    pub conditions: Vec<Condition>,
}

/// Condition groups combined with AND.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubjectSet {
    pub condition_groups: Vec<ConditionGroup>,
}

/// Subject sets combined with OR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubjectConditionSet {
    pub subject_sets: Vec<SubjectSet>,
}

impl SubjectConditionSet {
    /// A condition set with a single subject set holding a single condition.
    pub fn single(condition: Condition) -> Self {
        SubjectConditionSet {
            subject_sets: vec![SubjectSet {
                condition_groups: vec![ConditionGroup {
                    boolean_operator: BooleanOperator::And,
                    conditions: vec![condition],
                }],
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubjectMapping {
    #[serde(default)]
    pub id: String,
    pub attribute_value: AttributeValue,
    pub subject_condition_set: SubjectConditionSet,
    pub actions: Vec<Action>,
}
