use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::error::ErrorKind;
use crate::metrics::{DecisionStats, MetricsSink, RefreshStats, set_sink};
use crate::pdp::ClaimsEntityResolver;
use crate::store::{MemoryPolicyStore, PolicySnapshot};
use crate::token::{Claims, TokenType, VerifiedToken};
use crate::types::{
    Attribute, AttributeRule, Condition, ConditionOperator, DecisionKind, Entity, EntityChain,
    EntityKind, Obligation, ObligationValue, SubjectConditionSet, SubjectMapping,
};
use serde_json::{Value, json};
use yare::parameterized;

const NS: &str = "example.com";
const PREVENT_PRINT: &str = "https://example.com/obl/drm/value/prevent_print";

fn fqn(attribute: &str, value: &str) -> String {
    format!("https://{NS}/attr/{attribute}/value/{value}").to_ascii_lowercase()
}

fn mapping(attribute: &Attribute, idx: usize, selector: &str, expected: &str) -> SubjectMapping {
    SubjectMapping {
        id: format!("sm-{}-{idx}", attribute.name),
        attribute_value: attribute.values[idx].clone(),
        subject_condition_set: SubjectConditionSet::single(Condition::new(
            selector,
            ConditionOperator::In,
            &[expected],
        )),
        actions: vec![Action::new("read")],
    }
}

fn snapshot() -> PolicySnapshot {
    let classification =
        Attribute::new(NS, "classification", AttributeRule::Hierarchy, &["TS", "S", "C", "U"]);
    let relto = Attribute::new(NS, "relto", AttributeRule::AnyOf, &["USA", "GBR", "CZE"]);
    let mappings = vec![
        mapping(&classification, 1, "clearance", "S"),
        mapping(&relto, 2, "country", "CZE"),
    ];
    let obligations = vec![Obligation::new(
        NS,
        "drm",
        vec![ObligationValue::new(NS, "drm", "prevent_print").triggered_by(
            "read",
            &fqn("classification", "s"),
            &["alpha"],
        )],
    )];
    PolicySnapshot::new(vec![classification, relto], mappings, vec![], obligations)
}

fn service() -> AuthorizationService {
    AuthorizationService::new(
        Arc::new(Arc::new(snapshot())),
        Arc::new(ClaimsEntityResolver::new()),
        ServiceConfig::default(),
    )
    .unwrap()
}

fn subject(props: Value) -> Option<EntityIdentifier> {
    Some(EntityIdentifier::EntityChain(EntityChain {
        ephemeral_id: "chain-1".into(),
        entities: vec![Entity::subject("e1", EntityKind::Claims(props))],
    }))
}

fn cleared() -> Option<EntityIdentifier> {
    subject(json!({ "clearance": "S", "country": "CZE" }))
}

fn doc(id: &str, fqns: &[String]) -> Resource {
    let refs: Vec<&str> = fqns.iter().map(String::as_str).collect();
    Resource::attribute_values(id, &refs)
}

fn scope_for_client(client_id: &str) -> RequestScope {
    RequestScope::new(AuthContext {
        token: None,
        client_id: Some(client_id.to_string()),
        decision: None,
    })
}

fn multi(resources: Vec<Resource>) -> GetDecisionMultiResourceRequest {
    GetDecisionMultiResourceRequest {
        entity_identifier: cleared(),
        action: Action::new("read"),
        resources,
        fulfillable_obligation_fqns: vec![],
    }
}

include!("decisions.rs");
