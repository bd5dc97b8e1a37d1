//! Turning decision-point results into caller-facing resource decisions.

use crate::error::AuthzError;
use crate::types::{Decision, DecisionKind, ResourceDecision};

/// Decision for a single-resource request. `permitted` is the effect; the
/// resource id and obligations come from the first result of the first
/// decision.
pub fn rollup_single_resource_decision(
    permitted: bool,
    decisions: &[Option<Decision>],
) -> Result<ResourceDecision, AuthzError> {
    let first = decisions.first().ok_or(AuthzError::NoDecisions)?;
    let decision = first.as_ref().ok_or(AuthzError::DecisionCannotBeNil)?;
    let result = decision
        .results
        .first()
        .ok_or(AuthzError::DecisionMustHaveResults)?;
    Ok(ResourceDecision {
        ephemeral_resource_id: result.resource_id.clone(),
        decision: DecisionKind::from(permitted),
        required_obligations: result.required_obligations.clone(),
    })
}

/// One resource decision per result, in order. Each result's `passed` is the
/// effect; the decision-level `access` flag is not consulted.
pub fn rollup_multi_resource_decisions(
    decisions: &[Option<Decision>],
) -> Result<Vec<ResourceDecision>, AuthzError> {
    if decisions.is_empty() {
        return Err(AuthzError::NoDecisions);
    }
    let mut out = Vec::new();
    for decision in decisions {
        let decision = decision.as_ref().ok_or(AuthzError::DecisionCannotBeNil)?;
        if decision.results.is_empty() {
            return Err(AuthzError::DecisionMustHaveResults);
        }
        out.extend(decision.results.iter().map(|r| r.to_resource_decision()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceResult;
    use yare::parameterized;

    const WATERMARK: &str = "https://example.com/obl/drm/value/watermark";

    fn result(id: &str, passed: bool, obligations: &[&str]) -> ResourceResult {
        ResourceResult {
            resource_id: id.to_string(),
            resource_name: None,
            entitled: passed,
            obligations_satisfied: true,
            passed,
            data_rule_results: vec![],
            required_obligations: obligations.iter().map(|o| o.to_string()).collect(),
        }
    }

    fn decision(access: bool, results: Vec<ResourceResult>) -> Option<Decision> {
        Some(Decision {
            all_permitted: access,
            results,
        })
    }

    #[parameterized(
        permit = { true, DecisionKind::Permit },
        deny = { false, DecisionKind::Deny },
    )]
    fn test_single_carries_obligations_either_way(permitted: bool, expected: DecisionKind) {
        let decisions = vec![decision(permitted, vec![result("doc", permitted, &[WATERMARK])])];
        let rolled = rollup_single_resource_decision(permitted, &decisions).unwrap();
        assert_eq!(
            rolled,
            ResourceDecision {
                ephemeral_resource_id: "doc".to_string(),
                decision: expected,
                required_obligations: vec![WATERMARK.to_string()],
            }
        );
    }

    #[parameterized(
        no_decisions = { vec![], AuthzError::NoDecisions },
        nil_decision = { vec![None], AuthzError::DecisionCannotBeNil },
        no_results = { vec![decision(true, vec![])], AuthzError::DecisionMustHaveResults },
    )]
    fn test_single_errors(decisions: Vec<Option<Decision>>, expected: AuthzError) {
        assert_eq!(
            rollup_single_resource_decision(true, &decisions).unwrap_err(),
            expected
        );
    }

    #[test]
    fn test_multi_preserves_order_and_ignores_access() {
        let decisions = vec![decision(
            true,
            vec![
                result("a", true, &[]),
                result("b", false, &[WATERMARK]),
                result("c", true, &[WATERMARK]),
            ],
        )];
        let rolled = rollup_multi_resource_decisions(&decisions).unwrap();
        let summary: Vec<(String, DecisionKind, usize)> = rolled
            .iter()
            .map(|d| {
                (
                    d.ephemeral_resource_id.clone(),
                    d.decision,
                    d.required_obligations.len(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a".to_string(), DecisionKind::Permit, 0),
                ("b".to_string(), DecisionKind::Deny, 1),
                ("c".to_string(), DecisionKind::Permit, 1),
            ]
        );
    }

    #[test]
    fn test_multi_spans_decisions() {
        let decisions = vec![
            decision(false, vec![result("a", false, &[])]),
            decision(true, vec![result("b", true, &[])]),
        ];
        let rolled = rollup_multi_resource_decisions(&decisions).unwrap();
        assert_eq!(rolled.len(), 2);
        assert_eq!(rolled[1].decision, DecisionKind::Permit);
    }

    #[parameterized(
        no_decisions = { vec![], AuthzError::NoDecisions },
        nil_decision = { vec![decision(true, vec![result("a", true, &[])]), None], AuthzError::DecisionCannotBeNil },
        no_results = { vec![decision(true, vec![])], AuthzError::DecisionMustHaveResults },
    )]
    fn test_multi_errors(decisions: Vec<Option<Decision>>, expected: AuthzError) {
        assert_eq!(
            rollup_multi_resource_decisions(&decisions).unwrap_err(),
            expected
        );
    }
}
