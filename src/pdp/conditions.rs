use serde_json::Value;

use super::flatten::Flattened;
use crate::error::AuthzError;
use crate::types::{
    BooleanOperator, Condition, ConditionGroup, ConditionOperator, SubjectConditionSet, SubjectSet,
};

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Evaluate one condition. A selector that finds nothing is `false` for
/// every operator.
pub fn evaluate_condition(condition: &Condition, entity: &Flattened) -> Result<bool, AuthzError> {
    let found = entity.lookup(&condition.subject_external_selector_value);
    if found.is_empty() {
        return Ok(false);
    }
    let expected = &condition.subject_external_values;

    let is_in = || {
        found
            .iter()
            .filter_map(|v| v.as_str())
            .any(|v| expected.iter().any(|e| e == v))
    };

    match condition.operator {
        ConditionOperator::In => Ok(is_in()),
        ConditionOperator::NotIn => Ok(!is_in()),
        ConditionOperator::InContains => {
            let needles: Vec<String> = expected
                .iter()
                .filter(|e| !e.is_empty())
                .map(|e| e.to_ascii_lowercase())
                .collect();
            Ok(found.iter().filter_map(|v| as_text(v)).any(|haystack| {
                let haystack = haystack.to_ascii_lowercase();
                needles.iter().any(|n| haystack.contains(n.as_str()))
            }))
        }
        ConditionOperator::Unspecified => Err(AuthzError::EvalError(format!(
            "unspecified condition operator on selector '{}'",
            condition.subject_external_selector_value
        ))),
    }
}

pub fn evaluate_condition_group(
    group: &ConditionGroup,
    entity: &Flattened,
) -> Result<bool, AuthzError> {
    match group.boolean_operator {
        BooleanOperator::And => {
            for condition in &group.conditions {
                if !evaluate_condition(condition, entity)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        BooleanOperator::Or => {
            for condition in &group.conditions {
                if evaluate_condition(condition, entity)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        BooleanOperator::Unspecified => Err(AuthzError::EvalError(
            "unspecified boolean operator in condition group".to_string(),
        )),
    }
}

/// Every condition group must hold. An empty subject set never matches.
pub fn evaluate_subject_set(set: &SubjectSet, entity: &Flattened) -> Result<bool, AuthzError> {
    if set.condition_groups.is_empty() {
        return Ok(false);
    }
    for group in &set.condition_groups {
        if !evaluate_condition_group(group, entity)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Some subject set must hold.
pub fn evaluate_condition_set(
    set: &SubjectConditionSet,
    entity: &Flattened,
) -> Result<bool, AuthzError> {
    for subject_set in &set.subject_sets {
        if evaluate_subject_set(subject_set, entity)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use yare::parameterized;

    fn entity() -> Flattened {
        let value = json!({
            "email": "Alice@Example.com",
            "clearance": 3,
            "realm_access": { "roles": ["hr-admin", "user"] },
            "org": { "country": "CZE" }
        });
        match value {
            Value::Object(map) => Flattened::from_map(&map),
            _ => unreachable!(),
        }
    }

    #[parameterized(
        in_scalar = { "org.country", ConditionOperator::In, &["USA", "CZE"], true },
        in_array = { "realm_access.roles", ConditionOperator::In, &["user"], true },
        in_miss = { "realm_access.roles", ConditionOperator::In, &["admin"], false },
        in_case_sensitive = { "org.country", ConditionOperator::In, &["cze"], false },
        in_number_not_string = { "clearance", ConditionOperator::In, &["3"], false },
        not_in_hit = { "realm_access.roles", ConditionOperator::NotIn, &["user"], false },
        not_in_miss = { "org.country", ConditionOperator::NotIn, &["USA"], true },
        not_in_absent = { "missing.path", ConditionOperator::NotIn, &["USA"], false },
        in_absent = { "missing.path", ConditionOperator::In, &["USA"], false },
        contains_case_insensitive = { "email", ConditionOperator::InContains, &["@example.COM"], true },
        contains_array = { "realm_access.roles", ConditionOperator::InContains, &["ADMIN"], true },
        contains_number = { "clearance", ConditionOperator::InContains, &["3"], true },
        contains_miss = { "email", ConditionOperator::InContains, &["@other.com"], false },
    )]
    fn test_condition(selector: &str, op: ConditionOperator, values: &[&str], expected: bool) {
        let condition = Condition::new(selector, op, values);
        assert_eq!(evaluate_condition(&condition, &entity()).unwrap(), expected);
    }

    #[test]
    fn test_unspecified_operator_errors() {
        let condition = Condition::new("email", ConditionOperator::Unspecified, &["x"]);
        assert!(evaluate_condition(&condition, &entity()).is_err());

        let group = ConditionGroup {
            boolean_operator: BooleanOperator::Unspecified,
            conditions: vec![],
        };
        assert!(evaluate_condition_group(&group, &entity()).is_err());
    }

    fn group(op: BooleanOperator, conditions: Vec<Condition>) -> ConditionGroup {
        ConditionGroup {
            boolean_operator: op,
            conditions,
        }
    }

    #[test]
    fn test_groups_and_sets() {
        let hit = Condition::new("org.country", ConditionOperator::In, &["CZE"]);
        let miss = Condition::new("org.country", ConditionOperator::In, &["USA"]);

        let and = group(BooleanOperator::And, vec![hit.clone(), miss.clone()]);
        let or = group(BooleanOperator::Or, vec![hit.clone(), miss.clone()]);
        assert!(!evaluate_condition_group(&and, &entity()).unwrap());
        assert!(evaluate_condition_group(&or, &entity()).unwrap());

        let failing_set = SubjectSet {
            condition_groups: vec![or.clone(), and.clone()],
        };
        let passing_set = SubjectSet {
            condition_groups: vec![or.clone()],
        };
        assert!(!evaluate_subject_set(&failing_set, &entity()).unwrap());

        let set = SubjectConditionSet {
            subject_sets: vec![failing_set.clone(), passing_set],
        };
        assert!(evaluate_condition_set(&set, &entity()).unwrap());

        let set = SubjectConditionSet {
            subject_sets: vec![failing_set],
        };
        assert!(!evaluate_condition_set(&set, &entity()).unwrap());

        let empty = SubjectSet {
            condition_groups: vec![],
        };
        assert!(!evaluate_subject_set(&empty, &entity()).unwrap());
    }
}
