//! Just-in-time decisions: resolve the entity, build a decision point from
//! the current snapshot, decide per representation and consolidate.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EntityResolver, PdpOptions, PolicyDecisionPoint, chain_from_claims};
use crate::error::AuthzError;
use crate::store::SnapshotSource;
use crate::timers::{DecisionTimings, PhaseTimer};
use crate::token::VerifiedToken;
use crate::types::{
    Action, Decision, EntityChain, EntityEntitlements, EntityIdentifier, EntityRepresentation,
    Resource, ResourceResult,
};

/// Per-call inputs that do not come from the request body.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    /// Token verified by the interceptor, used for `use_request_token`.
    pub request_token: Option<&'a VerifiedToken>,
    /// Client the obligations are scoped to.
    pub client_id: Option<&'a str>,
    pub fulfillable_obligations: &'a [String],
    pub cancel: &'a CancellationToken,
}

/// Builds a [`PolicyDecisionPoint`] from the current snapshot on every call.
pub struct JustInTimePdp {
    snapshots: Arc<dyn SnapshotSource>,
    resolver: Arc<dyn EntityResolver>,
    options: PdpOptions,
}

/// Entity as seen by the decision point.
enum Resolved {
    Representations(Vec<EntityRepresentation>),
    RegisteredResource(String),
}

impl JustInTimePdp {
    pub fn new(
        snapshots: Arc<dyn SnapshotSource>,
        resolver: Arc<dyn EntityResolver>,
        options: PdpOptions,
    ) -> Self {
        JustInTimePdp {
            snapshots,
            resolver,
            options,
        }
    }

    async fn pdp(&self, cancel: &CancellationToken) -> Result<PolicyDecisionPoint, AuthzError> {
        let snapshot = self.snapshots.snapshot().await?;
        Ok(PolicyDecisionPoint::new(&snapshot, self.options)?.with_cancellation(cancel.clone()))
    }

    async fn chain_for(
        &self,
        identifier: &EntityIdentifier,
        ctx: &DecisionContext<'_>,
    ) -> Result<Option<EntityChain>, AuthzError> {
        match identifier {
            EntityIdentifier::Token(token) => {
                Ok(Some(self.resolver.entity_chain_from_token(token).await?))
            }
            EntityIdentifier::EntityChain(chain) => Ok(Some(chain.clone())),
            EntityIdentifier::UseRequestToken(_) => {
                let token = ctx
                    .request_token
                    .ok_or(AuthzError::MissingAuthorizationHeader)?;
                Ok(Some(chain_from_claims("request-token", &token.claims)))
            }
            EntityIdentifier::RegisteredResourceValueFqn(_) => Ok(None),
        }
    }

    async fn resolve(
        &self,
        identifier: &EntityIdentifier,
        ctx: &DecisionContext<'_>,
        subjects_only: bool,
    ) -> Result<Resolved, AuthzError> {
        if let EntityIdentifier::RegisteredResourceValueFqn(fqn) = identifier {
            return Ok(Resolved::RegisteredResource(fqn.clone()));
        }
        let Some(mut chain) = self.chain_for(identifier, ctx).await? else {
            return Err(AuthzError::EntityResolution(format!(
                "cannot resolve {}",
                identifier.kind_name()
            )));
        };
        if subjects_only {
            chain.entities.retain(|e| !e.is_environment());
        }
        if chain.entities.is_empty() {
            return Err(AuthzError::EntityResolution(format!(
                "entity chain '{}' has no entities to decide for",
                chain.ephemeral_id
            )));
        }
        let representations = self.resolver.resolve_entities(&chain).await?;
        if representations.is_empty() {
            return Err(AuthzError::EntityResolution(format!(
                "no representations resolved for '{}'",
                chain.ephemeral_id
            )));
        }
        Ok(Resolved::Representations(representations))
    }

    pub async fn get_decision(
        &self,
        identifier: &EntityIdentifier,
        action: &Action,
        resources: &[Resource],
        ctx: &DecisionContext<'_>,
    ) -> Result<Decision, AuthzError> {
        let mut timings = DecisionTimings::default();
        self.get_decision_timed(identifier, action, resources, ctx, &mut timings)
            .await
    }

    pub(crate) async fn get_decision_timed(
        &self,
        identifier: &EntityIdentifier,
        action: &Action,
        resources: &[Resource],
        ctx: &DecisionContext<'_>,
        timings: &mut DecisionTimings,
    ) -> Result<Decision, AuthzError> {
        if ctx.cancel.is_cancelled() {
            return Err(AuthzError::Cancelled);
        }

        let resolved = {
            let _t = PhaseTimer::new(&mut timings.resolve_entities);
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(AuthzError::Cancelled),
                resolved = self.resolve(identifier, ctx, true) => resolved?,
            }
        };
        let pdp = self.pdp(ctx.cancel).await?;

        let mut decision = match resolved {
            Resolved::RegisteredResource(fqn) => {
                let _t = PhaseTimer::new(&mut timings.evaluate);
                pdp.get_decision_registered_resource(&fqn, action, resources)?
            }
            Resolved::Representations(representations) => {
                let mut decisions = Vec::with_capacity(representations.len());
                for representation in &representations {
                    let entitled = {
                        let _t = PhaseTimer::new(&mut timings.entitlements);
                        pdp.entitlements_for(representation)?
                    };
                    let _t = PhaseTimer::new(&mut timings.evaluate);
                    decisions.push(pdp.decide(&entitled, action, resources)?);
                }
                consolidate(decisions)?
            }
        };

        {
            let _t = PhaseTimer::new(&mut timings.obligations);
            pdp.apply_obligations(
                &mut decision,
                action,
                resources,
                ctx.client_id,
                ctx.fulfillable_obligations,
            )?;
        }

        debug!(
            event = "Decision",
            phase = "Complete",
            entity = identifier.kind_name(),
            action = %action,
            resources = resources.len(),
            all_permitted = decision.all_permitted
        );
        Ok(decision)
    }

    pub async fn get_entitlements(
        &self,
        identifier: &EntityIdentifier,
        with_comprehensive_hierarchy: bool,
        ctx: &DecisionContext<'_>,
    ) -> Result<Vec<EntityEntitlements>, AuthzError> {
        let resolved = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(AuthzError::Cancelled),
            resolved = self.resolve(identifier, ctx, false) => resolved?,
        };
        let pdp = self.pdp(ctx.cancel).await?;
        match resolved {
            Resolved::RegisteredResource(fqn) => Ok(vec![
                pdp.get_entitlements_registered_resource(&fqn, with_comprehensive_hierarchy)?,
            ]),
            Resolved::Representations(representations) => {
                pdp.get_entitlements(&representations, with_comprehensive_hierarchy)
            }
        }
    }
}

/// Merge per-representation decisions: every representation must be
/// entitled to a resource for it to pass.
pub(crate) fn consolidate(decisions: Vec<Decision>) -> Result<Decision, AuthzError> {
    let mut decisions = decisions.into_iter();
    let Some(mut merged) = decisions.next() else {
        return Err(AuthzError::NoDecisions);
    };
    for other in decisions {
        if other.results.len() != merged.results.len() {
            warn!(
                event = "Decision",
                phase = "Consolidate",
                expected = merged.results.len(),
                got = other.results.len()
            );
            return Err(AuthzError::Consolidation(format!(
                "expected {} results, got {}",
                merged.results.len(),
                other.results.len()
            )));
        }
        for (into, from) in merged.results.iter_mut().zip(other.results) {
            merge_result(into, from)?;
        }
    }
    merged.all_permitted = !merged.results.is_empty() && merged.results.iter().all(|r| r.passed);
    Ok(merged)
}

fn merge_result(into: &mut ResourceResult, from: ResourceResult) -> Result<(), AuthzError> {
    if into.resource_id != from.resource_id {
        return Err(AuthzError::Consolidation(format!(
            "resource id mismatch: '{}' vs '{}'",
            into.resource_id, from.resource_id
        )));
    }
    into.entitled &= from.entitled;
    into.obligations_satisfied &= from.obligations_satisfied;
    into.passed = into.entitled && into.obligations_satisfied;
    for rule in from.data_rule_results {
        match into
            .data_rule_results
            .iter_mut()
            .find(|r| r.attribute_definition_fqn == rule.attribute_definition_fqn)
        {
            Some(existing) => {
                existing.passed &= rule.passed;
                for failure in rule.entitlement_failures {
                    if !existing.entitlement_failures.contains(&failure) {
                        existing.entitlement_failures.push(failure);
                    }
                }
            }
            None => into.data_rule_results.push(rule),
        }
    }
    Ok(())
}
