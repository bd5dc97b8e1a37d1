//! Data model: policy objects held in a snapshot, entities and resources named
//! by requests, and the decisions returned for them.
//!
//! Every FQN stored in these types is lowercase. Builders such as
//! [`Attribute::new`] and [`RegisteredResource::new`] derive canonical FQNs from
//! the short names, so test fixtures and callers never hand-assemble them.

mod action;
mod attribute;
mod decision;
mod entity;
mod obligation;
mod registered_resource;
mod request;
mod resource;
mod subject_mapping;

pub use action::{Action, StandardAction};
pub use attribute::{Attribute, AttributeRule, AttributeValue, Namespace};
pub use decision::{
    DataRuleResult, Decision, DecisionKind, EntitlementFailure, EntityEntitlements, PolicyVersion,
    ResourceDecision, ResourceResult,
};
pub use entity::{
    DirectEntitlement, Entity, EntityCategory, EntityChain, EntityIdentifier, EntityKind,
    EntityRepresentation, Token,
};
pub use obligation::{Obligation, ObligationTrigger, ObligationValue};
pub use registered_resource::{ActionAttributeValue, RegisteredResource, RegisteredResourceValue};
pub use request::{
    GetDecisionBulkRequest, GetDecisionBulkResponse, GetDecisionMultiResourceRequest,
    GetDecisionMultiResourceResponse, GetDecisionRequest, GetDecisionResponse,
    GetEntitlementsRequest, GetEntitlementsResponse,
};
pub use resource::{Resource, ResourceKind};
pub use subject_mapping::{
    BooleanOperator, Condition, ConditionGroup, ConditionOperator, SubjectConditionSet,
    SubjectMapping, SubjectSet,
};
