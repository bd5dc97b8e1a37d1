use super::*;
use crate::error::ErrorKind;
use crate::types::{
    Attribute, AttributeRule, Condition, ConditionOperator, DecisionKind, EntityRepresentation,
    Obligation, ObligationValue, RegisteredResource, Resource, SubjectConditionSet,
    SubjectMapping,
};
use serde_json::{Value, json};
use yare::parameterized;


const NS: &str = "example.com";
const PREVENT_PRINT: &str = "https://example.com/obl/drm/value/prevent_print";
const RR_INTERNAL: &str = "https://reg_res/network/value/internal";
const RR_EXTERNAL: &str = "https://reg_res/network/value/external";

fn fqn(attribute: &str, value: &str) -> String {
    format!("https://{NS}/attr/{attribute}/value/{value}").to_ascii_lowercase()
}

fn classification() -> Attribute {
    Attribute::new(NS, "classification", AttributeRule::Hierarchy, &["TS", "S", "C", "U"])
}

fn relto() -> Attribute {
    Attribute::new(NS, "relto", AttributeRule::AnyOf, &["USA", "GBR", "CZE"])
}

fn department() -> Attribute {
    Attribute::new(NS, "department", AttributeRule::AllOf, &["HR", "FINANCE"])
}

fn value_of(attribute: &Attribute, value: &str) -> crate::types::AttributeValue {
    attribute
        .values
        .iter()
        .find(|v| v.value.eq_ignore_ascii_case(value))
        .cloned()
        .unwrap_or_else(|| panic!("no value {value} on {}", attribute.fqn))
}

fn mapping(
    attribute: &Attribute,
    value: &str,
    selector: &str,
    expected: &[&str],
    actions: &[&str],
) -> SubjectMapping {
    SubjectMapping {
        id: format!("sm-{}-{value}", attribute.name),
        attribute_value: value_of(attribute, value),
        subject_condition_set: SubjectConditionSet::single(Condition::new(
            selector,
            ConditionOperator::In,
            expected,
        )),
        actions: actions.iter().map(|a| Action::new(*a)).collect(),
    }
}

fn subject_mappings() -> Vec<SubjectMapping> {
    let classification = classification();
    let relto = relto();
    let department = department();
    vec![
        mapping(&classification, "TS", "clearance", &["TS"], &["read"]),
        mapping(&classification, "S", "clearance", &["S"], &["read"]),
        mapping(&classification, "C", "clearance", &["C"], &["read"]),
        mapping(&relto, "USA", "country", &["USA"], &["read"]),
        mapping(&relto, "CZE", "country", &["CZE"], &["read"]),
        mapping(&department, "HR", "realm_access.roles", &["hr"], &["read", "update"]),
        mapping(&department, "FINANCE", "realm_access.roles", &["finance"], &["read"]),
    ]
}

fn registered_resources() -> Vec<RegisteredResource> {
    vec![RegisteredResource::new(
        "network",
        vec![
            (
                "internal",
                vec![
                    ("read", fqn("classification", "s").as_str()),
                    ("read", fqn("relto", "usa").as_str()),
                    ("create", fqn("classification", "ts").as_str()),
                ],
            ),
            ("external", vec![("create", fqn("relto", "gbr").as_str())]),
        ],
    )]
}

fn obligations() -> Vec<Obligation> {
    vec![Obligation::new(
        NS,
        "drm",
        vec![ObligationValue::new(NS, "drm", "prevent_print").triggered_by(
            "read",
            &fqn("classification", "s"),
            &["alpha"],
        )],
    )]
}

fn snapshot() -> PolicySnapshot {
    PolicySnapshot::new(
        vec![classification(), relto(), department()],
        subject_mappings(),
        registered_resources(),
        obligations(),
    )
}

fn pdp() -> PolicyDecisionPoint {
    PolicyDecisionPoint::new(&snapshot(), PdpOptions::default()).expect("snapshot should index")
}

fn entity(props: Value) -> EntityRepresentation {
    EntityRepresentation::new("entity-1", props)
}

fn resource(id: &str, fqns: &[String]) -> Resource {
    let refs: Vec<&str> = fqns.iter().map(String::as_str).collect();
    Resource::attribute_values(id, &refs)
}

fn read() -> Action {
    Action::new("read")
}

fn decision_kinds(decision: &Decision) -> Vec<DecisionKind> {
    decision
        .results
        .iter()
        .map(|r| DecisionKind::from(r.passed))
        .collect()
}

include!("entitlements.rs");
include!("decisions.rs");
include!("obligations.rs");
