//! The decision service: request validation, just-in-time decisions and the
//! caller-facing roll-up.
//!
//! Every operation takes a [`RequestScope`] with the caller's
//! [`AuthContext`] (from the interceptor) and a cancellation token tied to
//! the inbound request.

mod rollup;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use rollup::{rollup_multi_resource_decisions, rollup_single_resource_decision};

use crate::config::ServiceConfig;
use crate::error::AuthzError;
use crate::interceptor::AuthContext;
use crate::metrics::{record_decision, record_decision_phases};
use crate::pdp::{DecisionContext, EntityResolver, JustInTimePdp, PdpOptions};
use crate::store::SnapshotSource;
use crate::timers::DecisionTimings;
use crate::types::{
    Action, Decision, EntityIdentifier, GetDecisionBulkRequest, GetDecisionBulkResponse,
    GetDecisionMultiResourceRequest, GetDecisionMultiResourceResponse, GetDecisionRequest,
    GetDecisionResponse, GetEntitlementsRequest, GetEntitlementsResponse, Resource,
};
use crate::validation::{
    validate_get_decision, validate_get_decision_bulk, validate_get_decision_multi_resource,
    validate_get_entitlements,
};

/// Per-request state handed to every service call.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    pub auth: AuthContext,
    pub cancel: CancellationToken,
}

impl RequestScope {
    pub fn new(auth: AuthContext) -> Self {
        RequestScope {
            auth,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn decision_context<'a>(&'a self, fulfillable: &'a [String]) -> DecisionContext<'a> {
        DecisionContext {
            request_token: self.auth.token.as_ref(),
            client_id: self.auth.client_id.as_deref(),
            fulfillable_obligations: fulfillable,
            cancel: &self.cancel,
        }
    }
}

/// The caller-facing decision API.
///
/// Every operation validates its request before anything else and fails
/// with a validation error naming the offending field. Decisions are then
/// computed just in time: the entity is resolved through the
/// [`EntityResolver`], the current snapshot is taken from the
/// [`SnapshotSource`], and the result is rolled up into one
/// [`ResourceDecision`](crate::types::ResourceDecision) per resource, in
/// request order. Each decision is reported to the metrics sink with its
/// per-phase timings.
///
/// Bulk requests are decided one after another; a failure in any inner
/// request fails the whole call.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use serde_json::json;
/// use tdf_authz_core::config::ServiceConfig;
/// use tdf_authz_core::pdp::ClaimsEntityResolver;
/// use tdf_authz_core::store::PolicySnapshot;
/// use tdf_authz_core::types::{
///     Action, Attribute, AttributeRule, Condition, ConditionOperator, DecisionKind, Entity,
///     EntityChain, EntityIdentifier, EntityKind, GetDecisionRequest, Resource,
///     SubjectConditionSet, SubjectMapping,
/// };
/// use tdf_authz_core::{AuthorizationService, RequestScope};
///
/// # async fn run() -> Result<(), tdf_authz_core::AuthzError> {
/// let relto = Attribute::new("example.com", "relto", AttributeRule::AnyOf, &["usa", "cze"]);
/// let mapping = SubjectMapping {
///     id: "sm-cze".into(),
///     attribute_value: relto.values[1].clone(),
///     subject_condition_set: SubjectConditionSet::single(Condition::new(
///         "country",
///         ConditionOperator::In,
///         &["cze"],
///     )),
///     actions: vec![Action::new("read")],
/// };
/// let snapshot = Arc::new(PolicySnapshot::new(vec![relto], vec![mapping], vec![], vec![]));
/// let service = AuthorizationService::new(
///     Arc::new(snapshot),
///     Arc::new(ClaimsEntityResolver::new()),
///     ServiceConfig::default(),
/// )?;
///
/// let req = GetDecisionRequest {
///     entity_identifier: Some(EntityIdentifier::EntityChain(EntityChain {
///         ephemeral_id: "chain-1".into(),
///         entities: vec![Entity::subject("e1", EntityKind::Claims(json!({ "country": "cze" })))],
///     })),
///     action: Action::new("read"),
///     resource: Some(Resource::attribute_values(
///         "doc-1",
///         &["https://example.com/attr/relto/value/cze"],
///     )),
///     fulfillable_obligation_fqns: vec![],
/// };
/// let resp = service.get_decision(&req, &RequestScope::default()).await?;
/// assert_eq!(resp.decision.decision, DecisionKind::Permit);
/// assert_eq!(resp.decision.ephemeral_resource_id, "doc-1");
/// # Ok(())
/// # }
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(run()).unwrap();
/// ```
pub struct AuthorizationService {
    pdp: JustInTimePdp,
}

fn required_identifier(identifier: Option<&EntityIdentifier>) -> Result<&EntityIdentifier, AuthzError> {
    identifier.ok_or_else(|| AuthzError::validation("entity_identifier", "is required"))
}

impl AuthorizationService {
    pub fn new(
        snapshot_source: Arc<dyn SnapshotSource>,
        entity_resolver: Arc<dyn EntityResolver>,
        config: ServiceConfig,
    ) -> Result<Self, AuthzError> {
        config.validate()?;
        let options = PdpOptions {
            allow_direct_entitlements: config.allow_direct_entitlements,
        };
        info!(
            event = "Service",
            phase = "Init",
            allow_direct_entitlements = options.allow_direct_entitlements
        );
        Ok(AuthorizationService {
            pdp: JustInTimePdp::new(snapshot_source, entity_resolver, options),
        })
    }

    /// Decide, then report the call to the metrics sink.
    async fn decide(
        &self,
        identifier: &EntityIdentifier,
        action: &Action,
        resources: &[Resource],
        ctx: &DecisionContext<'_>,
    ) -> Result<Decision, AuthzError> {
        let start = Instant::now();
        let mut timings = DecisionTimings::default();
        let decision = self
            .pdp
            .get_decision_timed(identifier, action, resources, ctx, &mut timings)
            .await?;
        let elapsed = start.elapsed();
        record_decision(decision.all_permitted, elapsed, resources.len(), action.name());
        record_decision_phases(
            decision.all_permitted,
            resources.len(),
            action.name(),
            timings.into_phases(elapsed),
        );
        Ok(decision)
    }

    pub async fn get_decision(
        &self,
        req: &GetDecisionRequest,
        scope: &RequestScope,
    ) -> Result<GetDecisionResponse, AuthzError> {
        validate_get_decision(req)?;
        let identifier = required_identifier(req.entity_identifier.as_ref())?;
        let resource = req
            .resource
            .clone()
            .ok_or_else(|| AuthzError::validation("resource", "is required"))?;

        let ctx = scope.decision_context(&req.fulfillable_obligation_fqns);
        let decision = self.decide(identifier, &req.action, &[resource], &ctx).await?;
        let permitted = decision.all_permitted;
        let decision = rollup_single_resource_decision(permitted, &[Some(decision)])?;
        debug!(
            event = "Service",
            phase = "GetDecision",
            action = %req.action,
            decision = %decision.decision
        );
        Ok(GetDecisionResponse { decision })
    }

    pub async fn get_decision_multi_resource(
        &self,
        req: &GetDecisionMultiResourceRequest,
        scope: &RequestScope,
    ) -> Result<GetDecisionMultiResourceResponse, AuthzError> {
        validate_get_decision_multi_resource(req)?;
        self.multi_resource(req, scope).await
    }

    async fn multi_resource(
        &self,
        req: &GetDecisionMultiResourceRequest,
        scope: &RequestScope,
    ) -> Result<GetDecisionMultiResourceResponse, AuthzError> {
        let identifier = required_identifier(req.entity_identifier.as_ref())?;
        let ctx = scope.decision_context(&req.fulfillable_obligation_fqns);
        let decision = self
            .decide(identifier, &req.action, &req.resources, &ctx)
            .await?;
        let all_permitted = decision.all_permitted;
        let resource_decisions = rollup_multi_resource_decisions(&[Some(decision)])?;
        debug!(
            event = "Service",
            phase = "GetDecisionMultiResource",
            action = %req.action,
            resources = resource_decisions.len(),
            all_permitted
        );
        Ok(GetDecisionMultiResourceResponse {
            all_permitted,
            resource_decisions,
        })
    }

    /// Requests are decided independently, and responses line up with them.
    pub async fn get_decision_bulk(
        &self,
        req: &GetDecisionBulkRequest,
        scope: &RequestScope,
    ) -> Result<GetDecisionBulkResponse, AuthzError> {
        validate_get_decision_bulk(req)?;
        let mut decision_responses = Vec::with_capacity(req.decision_requests.len());
        for inner in &req.decision_requests {
            if scope.cancel.is_cancelled() {
                return Err(AuthzError::Cancelled);
            }
            decision_responses.push(self.multi_resource(inner, scope).await?);
        }
        debug!(
            event = "Service",
            phase = "GetDecisionBulk",
            requests = decision_responses.len()
        );
        Ok(GetDecisionBulkResponse { decision_responses })
    }

    pub async fn get_entitlements(
        &self,
        req: &GetEntitlementsRequest,
        scope: &RequestScope,
    ) -> Result<GetEntitlementsResponse, AuthzError> {
        validate_get_entitlements(req)?;
        let identifier = required_identifier(req.entity_identifier.as_ref())?;
        let ctx = scope.decision_context(&[]);
        let entitlements = self
            .pdp
            .get_entitlements(identifier, req.with_comprehensive_hierarchy, &ctx)
            .await?;
        debug!(
            event = "Service",
            phase = "GetEntitlements",
            entities = entitlements.len(),
            comprehensive = req.with_comprehensive_hierarchy
        );
        Ok(GetEntitlementsResponse { entitlements })
    }
}
