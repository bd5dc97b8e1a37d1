//! Policy decision point.
//!
//! A [`PolicyDecisionPoint`] is built from one [`PolicySnapshot`] and is
//! immutable afterwards. It computes which attribute values an entity is
//! entitled to, evaluates each resource's attribute rules against those
//! entitlements, and lists the obligations a decision carries.
//!
//! ```rust
//! use tdf_authz_core::pdp::{PdpOptions, PolicyDecisionPoint};
//! use tdf_authz_core::store::PolicySnapshot;
//! use tdf_authz_core::types::{
//!     Action, Attribute, AttributeRule, Condition, ConditionOperator, EntityRepresentation,
//!     Resource, SubjectConditionSet, SubjectMapping,
//! };
//! use serde_json::json;
//!
//! let relto = Attribute::new("example.com", "relto", AttributeRule::AnyOf, &["usa", "cze"]);
//! let mapping = SubjectMapping {
//!     id: "sm-1".into(),
//!     attribute_value: relto.values[1].clone(),
//!     subject_condition_set: SubjectConditionSet::single(Condition::new(
//!         "country",
//!         ConditionOperator::In,
//!         &["CZE"],
//!     )),
//!     actions: vec![Action::new("read")],
//! };
//! let snapshot = PolicySnapshot::new(vec![relto], vec![mapping], vec![], vec![]);
//! let pdp = PolicyDecisionPoint::new(&snapshot, PdpOptions::default()).unwrap();
//!
//! let entity = EntityRepresentation::new("alice", json!({ "country": "CZE" }));
//! let decision = pdp
//!     .get_decision(
//!         &entity,
//!         &Action::new("read"),
//!         &[Resource::attribute_values(
//!             "doc",
//!             &[
//!                 "https://example.com/attr/relto/value/usa",
//!                 "https://example.com/attr/relto/value/cze",
//!             ],
//!         )],
//!     )
//!     .unwrap();
//! assert!(decision.all_permitted);
//! ```

mod conditions;
mod entity;
mod flatten;
mod jit;
mod obligations;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use conditions::{
    evaluate_condition, evaluate_condition_group, evaluate_condition_set, evaluate_subject_set,
};
pub use entity::{ClaimsEntityResolver, EntityResolver, chain_from_claims, entity_properties};
pub use flatten::Flattened;
pub use jit::{DecisionContext, JustInTimePdp};
pub use obligations::{ObligationIndex, all_fulfillable};

use crate::error::AuthzError;
use crate::identifier::definition_fqn_of;
use crate::store::PolicySnapshot;
use crate::types::{
    Action, Attribute, AttributeRule, DataRuleResult, Decision, EntitlementFailure,
    EntityEntitlements, EntityRepresentation, RegisteredResourceValue, Resource, ResourceKind,
    ResourceResult, SubjectMapping,
};

/// Attribute value FQN to the actions an entity may take on it.
pub type EntitlementMap = HashMap<String, Vec<Action>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PdpOptions {
    /// Honor direct entitlements carried by entity representations, and
    /// accept unknown values of known definitions on resources.
    pub allow_direct_entitlements: bool,
}

/// Decisions over one immutable policy snapshot.
///
/// Only active attributes, values and registered resources are indexed, and
/// every FQN is stored lowercased. Entitlements come from subject mappings
/// whose condition sets match an entity's flattened properties, plus direct
/// entitlements when [`PdpOptions::allow_direct_entitlements`] is set.
///
/// The values a resource carries are grouped by definition, and the
/// resource passes when every group grants access under its rule:
///
/// * `AllOf`: each of the resource's values is entitled.
/// * `AnyOf`: at least one of them is.
/// * `Hierarchy`: the entity is entitled to the highest-ranked value on the
///   resource or to any value ranked above it.
///
/// A value the snapshot does not know is an error, unless direct
/// entitlements are allowed and its definition exists. A registered
/// resource with no values bound for the action is denied.
/// [`apply_obligations`] attaches the obligations each resource triggers
/// and fails resources whose obligations the caller cannot fulfill.
///
/// [`apply_obligations`]: PolicyDecisionPoint::apply_obligations
///
/// Long decisions poll the token set with [`with_cancellation`] between
/// resources and stop with a cancellation error.
///
/// [`with_cancellation`]: PolicyDecisionPoint::with_cancellation
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tdf_authz_core::pdp::{PdpOptions, PolicyDecisionPoint};
/// use tdf_authz_core::store::PolicySnapshot;
/// use tdf_authz_core::types::{
///     Action, Attribute, AttributeRule, Condition, ConditionOperator, EntityRepresentation,
///     Resource, SubjectConditionSet, SubjectMapping,
/// };
///
/// # fn main() -> Result<(), tdf_authz_core::AuthzError> {
/// let classification =
///     Attribute::new("example.com", "classification", AttributeRule::Hierarchy, &["ts", "s", "c"]);
/// let secret = SubjectMapping {
///     id: "sm-secret".into(),
///     attribute_value: classification.values[1].clone(),
///     subject_condition_set: SubjectConditionSet::single(Condition::new(
///         "clearance",
///         ConditionOperator::In,
///         &["s"],
///     )),
///     actions: vec![Action::new("read")],
/// };
/// let snapshot = PolicySnapshot::new(vec![classification], vec![secret], vec![], vec![]);
/// let pdp = PolicyDecisionPoint::new(&snapshot, PdpOptions::default())?;
///
/// let alice = EntityRepresentation::new("alice", json!({ "clearance": "s" }));
/// let entitled = pdp.entitlements_for(&alice)?;
/// let decision = pdp.decide(
///     &entitled,
///     &Action::new("read"),
///     &[
///         Resource::attribute_values("memo", &["https://example.com/attr/classification/value/c"]),
///         Resource::attribute_values("plan", &["https://example.com/attr/classification/value/ts"]),
///     ],
/// )?;
/// assert!(decision.results[0].passed);
/// assert!(!decision.results[1].passed);
/// assert!(!decision.all_permitted);
/// # Ok(())
/// # }
/// ```
pub struct PolicyDecisionPoint {
    definitions: HashMap<String, Attribute>,
    value_definitions: HashMap<String, String>,
    subject_mappings: Vec<SubjectMapping>,
    registered_values: HashMap<String, RegisteredResourceValue>,
    obligations: ObligationIndex,
    options: PdpOptions,
    cancel: Option<CancellationToken>,
}

fn add_actions(map: &mut EntitlementMap, fqn: &str, actions: impl IntoIterator<Item = Action>) {
    let slot = map.entry(fqn.to_ascii_lowercase()).or_default();
    for action in actions {
        if !slot.contains(&action) {
            slot.push(action);
        }
    }
}

fn has_action(entitled: &EntitlementMap, fqn: &str, action: &Action) -> bool {
    entitled
        .get(fqn)
        .is_some_and(|actions| actions.iter().any(|a| a.matches(action.name())))
}

impl PolicyDecisionPoint {
    /// Index the active part of `snapshot`.
    pub fn new(snapshot: &PolicySnapshot, options: PdpOptions) -> Result<Self, AuthzError> {
        let mut definitions = HashMap::new();
        let mut value_definitions = HashMap::new();
        for attribute in &snapshot.attributes {
            if !attribute.is_active() {
                debug!(event = "Pdp", phase = "Index", definition = %attribute.fqn, "Skipping inactive definition");
                continue;
            }
            let mut attribute = attribute.clone();
            attribute.fqn = attribute.fqn.to_ascii_lowercase();
            attribute.values.retain(|v| v.active);
            for value in &mut attribute.values {
                value.fqn = value.fqn.to_ascii_lowercase();
                value_definitions.insert(value.fqn.clone(), attribute.fqn.clone());
            }
            definitions.insert(attribute.fqn.clone(), attribute);
        }

        let mut subject_mappings = Vec::new();
        for mapping in &snapshot.subject_mappings {
            let fqn = mapping.attribute_value.fqn.to_ascii_lowercase();
            if value_definitions.contains_key(&fqn) {
                subject_mappings.push(mapping.clone());
            } else {
                warn!(
                    event = "Pdp",
                    phase = "Index",
                    subject_mapping = %mapping.id,
                    attribute_value = %fqn,
                    "Skipping subject mapping for an unknown or inactive attribute value"
                );
            }
        }

        let registered_values = snapshot
            .registered_resources
            .iter()
            .flat_map(|rr| rr.values.iter())
            .map(|value| (value.fqn.to_ascii_lowercase(), value.clone()))
            .collect();

        let obligations = ObligationIndex::new(&snapshot.obligations)?;

        debug!(
            event = "Pdp",
            phase = "Indexed",
            generation = snapshot.version.generation,
            definitions = definitions.len(),
            values = value_definitions.len(),
            subject_mappings = subject_mappings.len()
        );

        Ok(PolicyDecisionPoint {
            definitions,
            value_definitions,
            subject_mappings,
            registered_values,
            obligations,
            options,
            cancel: None,
        })
    }

    /// Stop decision loops at the next resource boundary once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_cancelled(&self) -> Result<(), AuthzError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(AuthzError::Cancelled),
            _ => Ok(()),
        }
    }

    fn registered_value(&self, fqn: &str) -> Result<&RegisteredResourceValue, AuthzError> {
        self.registered_values
            .get(&fqn.to_ascii_lowercase())
            .ok_or_else(|| AuthzError::RegisteredResourceValueNotFound(fqn.to_string()))
    }

    /// Unexpanded entitlements of one representation.
    pub fn entitlements_for(&self, entity: &EntityRepresentation) -> Result<EntitlementMap, AuthzError> {
        let bags: Vec<Flattened> = entity
            .additional_props
            .iter()
            .map(Flattened::from_map)
            .collect();

        let mut entitled = EntitlementMap::new();
        for mapping in &self.subject_mappings {
            if mapping.actions.is_empty() {
                continue;
            }
            let mut matched = false;
            for bag in &bags {
                if evaluate_condition_set(&mapping.subject_condition_set, bag)? {
                    matched = true;
                    break;
                }
            }
            if matched {
                add_actions(
                    &mut entitled,
                    &mapping.attribute_value.fqn,
                    mapping.actions.iter().cloned(),
                );
            }
        }

        if self.options.allow_direct_entitlements {
            for direct in &entity.direct_entitlements {
                add_actions(
                    &mut entitled,
                    &direct.attribute_value_fqn,
                    direct.actions.iter().map(Action::new),
                );
            }
        }

        debug!(
            event = "Pdp",
            phase = "Entitlements",
            entity_id = %entity.original_id,
            count = entitled.len()
        );
        Ok(entitled)
    }

    /// Give every entitled value of a `HIERARCHY` definition the values
    /// ranked below it, with the same actions.
    fn expand_hierarchy(&self, entitled: &mut EntitlementMap) {
        let entries: Vec<(String, Vec<Action>)> = entitled
            .iter()
            .map(|(fqn, actions)| (fqn.clone(), actions.clone()))
            .collect();
        for (fqn, actions) in entries {
            let Some(definition) = self
                .value_definitions
                .get(&fqn)
                .and_then(|d| self.definitions.get(d))
            else {
                continue;
            };
            if definition.rule != AttributeRule::Hierarchy {
                continue;
            }
            let Some(idx) = definition.value_index(&fqn) else {
                continue;
            };
            for lower in definition.values.iter().skip(idx + 1) {
                add_actions(entitled, &lower.fqn, actions.iter().cloned());
            }
        }
    }

    fn into_entity_entitlements(
        &self,
        ephemeral_id: &str,
        mut entitled: EntitlementMap,
        with_comprehensive_hierarchy: bool,
    ) -> EntityEntitlements {
        if with_comprehensive_hierarchy {
            self.expand_hierarchy(&mut entitled);
        }
        EntityEntitlements {
            ephemeral_id: ephemeral_id.to_string(),
            actions_per_attribute_value_fqn: entitled.into_iter().collect::<BTreeMap<_, _>>(),
        }
    }

    pub fn get_entitlements(
        &self,
        entities: &[EntityRepresentation],
        with_comprehensive_hierarchy: bool,
    ) -> Result<Vec<EntityEntitlements>, AuthzError> {
        entities
            .iter()
            .map(|entity| {
                let entitled = self.entitlements_for(entity)?;
                Ok(self.into_entity_entitlements(
                    &entity.original_id,
                    entitled,
                    with_comprehensive_hierarchy,
                ))
            })
            .collect()
    }

    /// Entitlements of a registered resource value: every action-attribute
    /// binding it declares.
    pub fn get_entitlements_registered_resource(
        &self,
        fqn: &str,
        with_comprehensive_hierarchy: bool,
    ) -> Result<EntityEntitlements, AuthzError> {
        let value = self.registered_value(fqn)?;
        let mut entitled = EntitlementMap::new();
        for binding in &value.action_attribute_values {
            add_actions(
                &mut entitled,
                &binding.attribute_value_fqn,
                [binding.action.clone()],
            );
        }
        Ok(self.into_entity_entitlements(&value.fqn, entitled, with_comprehensive_hierarchy))
    }

    pub fn get_decision(
        &self,
        entity: &EntityRepresentation,
        action: &Action,
        resources: &[Resource],
    ) -> Result<Decision, AuthzError> {
        let entitled = self.entitlements_for(entity)?;
        self.decide(&entitled, action, resources)
    }

    /// Decide for a registered resource value acting as the entity. Its
    /// entitlements are the bindings declared for `action`.
    pub fn get_decision_registered_resource(
        &self,
        entity_fqn: &str,
        action: &Action,
        resources: &[Resource],
    ) -> Result<Decision, AuthzError> {
        let value = self.registered_value(entity_fqn)?;
        let mut entitled = EntitlementMap::new();
        for fqn in value.attribute_values_for(action) {
            add_actions(&mut entitled, &fqn, [action.clone()]);
        }
        self.decide(&entitled, action, resources)
    }

    /// Evaluate `resources` in order against precomputed entitlements.
    pub fn decide(
        &self,
        entitled: &EntitlementMap,
        action: &Action,
        resources: &[Resource],
    ) -> Result<Decision, AuthzError> {
        let mut results = Vec::with_capacity(resources.len());
        for (idx, resource) in resources.iter().enumerate() {
            self.check_cancelled()?;
            let resource = resource.normalized(idx);
            results.push(self.evaluate_resource(entitled, action, &resource)?);
        }
        Ok(Decision {
            all_permitted: !results.is_empty() && results.iter().all(|r| r.passed),
            results,
        })
    }

    /// Attribute value FQNs a resource stands for under `action`.
    pub fn resource_value_fqns(
        &self,
        action: &Action,
        resource: &Resource,
    ) -> Result<Vec<String>, AuthzError> {
        match &resource.kind {
            ResourceKind::AttributeValues { fqns } => {
                Ok(fqns.iter().map(|f| f.to_ascii_lowercase()).collect())
            }
            ResourceKind::RegisteredResourceValueFqn(fqn) => {
                Ok(self.registered_value(fqn)?.attribute_values_for(action))
            }
        }
    }

    /// Obligations triggered per resource, in resource order.
    pub fn required_obligations(
        &self,
        action: &Action,
        resources: &[Resource],
        client_id: Option<&str>,
    ) -> Result<Vec<Vec<String>>, AuthzError> {
        resources
            .iter()
            .map(|resource| {
                let fqns = self.resource_value_fqns(action, resource)?;
                Ok(self.obligations.required_for(action, &fqns, client_id))
            })
            .collect()
    }

    /// Attach required obligations to each result and downgrade results whose
    /// obligations the caller cannot fulfill.
    pub fn apply_obligations(
        &self,
        decision: &mut Decision,
        action: &Action,
        resources: &[Resource],
        client_id: Option<&str>,
        fulfillable: &[String],
    ) -> Result<(), AuthzError> {
        if decision.results.len() != resources.len() {
            return Err(AuthzError::Consolidation(format!(
                "{} results for {} resources",
                decision.results.len(),
                resources.len()
            )));
        }
        let required = self.required_obligations(action, resources, client_id)?;
        for (result, required) in decision.results.iter_mut().zip(required) {
            result.obligations_satisfied = all_fulfillable(&required, fulfillable);
            result.required_obligations = required;
            result.passed = result.entitled && result.obligations_satisfied;
        }
        decision.all_permitted =
            !decision.results.is_empty() && decision.results.iter().all(|r| r.passed);
        Ok(())
    }

    fn evaluate_resource(
        &self,
        entitled: &EntitlementMap,
        action: &Action,
        resource: &Resource,
    ) -> Result<ResourceResult, AuthzError> {
        let (fqns, resource_name) = match &resource.kind {
            ResourceKind::AttributeValues { fqns } => (fqns.clone(), None),
            ResourceKind::RegisteredResourceValueFqn(fqn) => {
                let value = self.registered_value(fqn)?;
                (value.attribute_values_for(action), Some(value.fqn.clone()))
            }
        };

        if fqns.is_empty() {
            debug!(
                event = "Pdp",
                phase = "Evaluate",
                resource_id = %resource.ephemeral_id,
                action = %action,
                "No attribute values bound for action, denying"
            );
            return Ok(ResourceResult {
                resource_id: resource.ephemeral_id.clone(),
                resource_name,
                entitled: false,
                obligations_satisfied: true,
                passed: false,
                data_rule_results: Vec::new(),
                required_obligations: Vec::new(),
            });
        }

        let data_rule_results = self.evaluate_attribute_values(entitled, action, &fqns)?;
        let passed = data_rule_results.iter().all(|r| r.passed);
        debug!(
            event = "Pdp",
            phase = "Evaluate",
            resource_id = %resource.ephemeral_id,
            action = %action,
            definitions = data_rule_results.len(),
            passed
        );
        Ok(ResourceResult {
            resource_id: resource.ephemeral_id.clone(),
            resource_name,
            entitled: passed,
            obligations_satisfied: true,
            passed,
            data_rule_results,
            required_obligations: Vec::new(),
        })
    }

    /// Definition of a value FQN and the value's rank in it. Unknown values of
    /// a known definition have no rank and are only accepted with direct
    /// entitlements enabled.
    fn resolve_value(&self, fqn: &str) -> Result<(&Attribute, Option<usize>), AuthzError> {
        if let Some(definition_fqn) = self.value_definitions.get(fqn) {
            let definition = self
                .definitions
                .get(definition_fqn)
                .ok_or_else(|| AuthzError::DefinitionNotFound(definition_fqn.clone()))?;
            return Ok((definition, definition.value_index(fqn)));
        }
        let definition_fqn =
            definition_fqn_of(fqn).map_err(|_| AuthzError::FqnNotFound(fqn.to_string()))?;
        let Some(definition) = self.definitions.get(&definition_fqn) else {
            return Err(AuthzError::DefinitionNotFound(definition_fqn));
        };
        if self.options.allow_direct_entitlements {
            return Ok((definition, None));
        }
        Err(AuthzError::FqnNotFound(fqn.to_string()))
    }

    fn evaluate_attribute_values(
        &self,
        entitled: &EntitlementMap,
        action: &Action,
        fqns: &[String],
    ) -> Result<Vec<DataRuleResult>, AuthzError> {
        let mut groups: Vec<(&Attribute, Vec<(String, Option<usize>)>)> = Vec::new();
        for fqn in fqns {
            let fqn = fqn.to_ascii_lowercase();
            let (definition, rank) = self.resolve_value(&fqn)?;
            let slot = match groups.iter().position(|(d, _)| d.fqn == definition.fqn) {
                Some(pos) => &mut groups[pos].1,
                None => {
                    groups.push((definition, Vec::new()));
                    let last = groups.len() - 1;
                    &mut groups[last].1
                }
            };
            if !slot.iter().any(|(f, _)| *f == fqn) {
                slot.push((fqn, rank));
            }
        }

        groups
            .into_iter()
            .map(|(definition, values)| evaluate_rule(definition, &values, entitled, action))
            .collect()
    }
}

fn evaluate_rule(
    definition: &Attribute,
    values: &[(String, Option<usize>)],
    entitled: &EntitlementMap,
    action: &Action,
) -> Result<DataRuleResult, AuthzError> {
    let failure = |fqn: &str| EntitlementFailure {
        attribute_value_fqn: fqn.to_string(),
        action_name: action.name().to_string(),
    };
    let mut failures = Vec::new();

    let passed = match definition.rule {
        AttributeRule::AllOf => {
            for (fqn, _) in values {
                if !has_action(entitled, fqn, action) {
                    failures.push(failure(fqn));
                }
            }
            failures.is_empty()
        }
        AttributeRule::AnyOf => {
            let any = values.iter().any(|(fqn, _)| has_action(entitled, fqn, action));
            if !any {
                failures.extend(values.iter().map(|(fqn, _)| failure(fqn)));
            }
            any
        }
        AttributeRule::Hierarchy => {
            // Lower index means higher rank; the entity needs a value at or
            // above the highest-ranked value on the resource.
            let highest = values
                .iter()
                .filter_map(|(fqn, rank)| rank.map(|r| (r, fqn)))
                .min_by_key(|(rank, _)| *rank);
            let ranked_ok = match highest {
                None => true,
                Some((rank, fqn)) => {
                    let ok = definition
                        .values
                        .iter()
                        .take(rank + 1)
                        .any(|v| has_action(entitled, &v.fqn, action));
                    if !ok {
                        failures.push(failure(fqn));
                    }
                    ok
                }
            };
            let mut unranked_ok = true;
            for (fqn, rank) in values {
                if rank.is_none() && !has_action(entitled, fqn, action) {
                    failures.push(failure(fqn));
                    unranked_ok = false;
                }
            }
            ranked_ok && unranked_ok
        }
        AttributeRule::Unspecified => {
            return Err(AuthzError::InvalidAttributeRule(definition.fqn.clone()));
        }
    };

    Ok(DataRuleResult {
        attribute_definition_fqn: definition.fqn.clone(),
        passed,
        resource_value_fqns: values.iter().map(|(fqn, _)| fqn.clone()).collect(),
        entitlement_failures: failures,
    })
}
