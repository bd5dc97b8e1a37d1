//! Shape and size checks run before any decision is computed.
//!
//! The request types derive [`validator::Validate`]: list bounds are
//! `length` rules, nested requests and resources are `nested`, and the URI,
//! FQN and `use_request_token` rules are the custom functions below. A
//! failed validation is reported as [`AuthzError::Validation`] carrying the
//! full path of the first offending field, e.g.
//! `decision_requests[3].resources[0].attribute_values.fqns`.

use std::borrow::Cow;

use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::error::AuthzError;
use crate::identifier::{FullyQualified, FullyQualifiedObligation, FullyQualifiedRegisteredResourceValue};
use crate::types::{
    Action, EntityIdentifier, GetDecisionBulkRequest, GetDecisionMultiResourceRequest,
    GetDecisionRequest, GetEntitlementsRequest, Resource, ResourceKind,
};

pub const MAX_ENTITY_CHAIN: usize = 10;
pub const MAX_RESOURCE_FQNS: usize = 20;
pub const MAX_RESOURCES: usize = 1000;
pub const MAX_BULK_REQUESTS: usize = 200;
pub const MAX_FULFILLABLE_OBLIGATIONS: usize = 50;

/// Param naming the rest of the path below the field a custom check ran on.
const PATH_PARAM: &str = "path";
/// Key validator files struct-level (`schema`) errors under.
const STRUCT_KEY: &str = "__all__";

fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn count_message(min: usize, max: usize, len: usize) -> String {
    format!("must contain between {min} and {max} items, got {len}")
}

/// A custom-check failure located `suffix` below the validated field.
fn invalid_at(suffix: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    let mut err = ValidationError::new("invalid").with_message(Cow::Owned(reason.into()));
    err.add_param(Cow::Borrowed(PATH_PARAM), &suffix.into());
    err
}

fn check_uri(suffix: &str, value: &str) -> Result<(), ValidationError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| invalid_at(suffix, format!("'{value}' is not a valid URI: {e}")))
}

fn param<'a>(err: &'a ValidationError, name: &str) -> Option<&'a Value> {
    err.params.get(name)
}

fn describe(err: &ValidationError) -> String {
    if let Some(message) = &err.message {
        return message.to_string();
    }
    match &*err.code {
        "required" => "is required".to_string(),
        "length" => {
            let min = param(err, "min").and_then(Value::as_u64).unwrap_or(0);
            let got = match param(err, "value") {
                Some(Value::Array(items)) => Some(items.len()),
                Some(Value::String(text)) => Some(text.chars().count()),
                _ => None,
            };
            match (param(err, "max").and_then(Value::as_u64), got) {
                (Some(max), Some(got)) => count_message(min as usize, max as usize, got),
                (Some(max), None) => format!("must contain between {min} and {max} items"),
                (None, _) => format!("must contain at least {min} items"),
            }
        }
        code => code.to_string(),
    }
}

/// The first failure in field order, as `(path, reason)`.
fn first_error(prefix: &str, errors: &ValidationErrors) -> Option<(String, String)> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    for (name, kind) in fields {
        let name: &str = name.as_ref();
        let here = if name == STRUCT_KEY {
            prefix.to_string()
        } else {
            join(prefix, name)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                if let Some(err) = errs.first() {
                    let path = match param(err, PATH_PARAM).and_then(Value::as_str) {
                        Some(suffix) if here.is_empty() => suffix.trim_start_matches('.').to_string(),
                        Some(suffix) => format!("{here}{suffix}"),
                        None => here,
                    };
                    return Some((path, describe(err)));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                if let Some(found) = first_error(&here, inner) {
                    return Some(found);
                }
            }
            ValidationErrorsKind::List(items) => {
                for (i, inner) in items {
                    if let Some(found) = first_error(&format!("{here}[{i}]"), inner) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

/// Collapse a validator report into one [`AuthzError::Validation`], the
/// first failing field (in field name order) under `prefix`.
pub fn into_authz_error(prefix: &str, errors: &ValidationErrors) -> AuthzError {
    match first_error(prefix, errors) {
        Some((field, reason)) => AuthzError::validation(field, reason),
        None => AuthzError::validation(
            if prefix.is_empty() { "request" } else { prefix },
            errors.to_string(),
        ),
    }
}

fn nested(segment: &str, errors: &ValidationErrors) -> ValidationError {
    let (path, reason) =
        first_error(segment, errors).unwrap_or_else(|| (segment.to_string(), errors.to_string()));
    invalid_at(format!(".{path}"), reason)
}

pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message(Cow::Borrowed("must not be empty")));
    }
    Ok(())
}

pub(crate) fn entity_identifier(identifier: &EntityIdentifier) -> Result<(), ValidationError> {
    match identifier {
        EntityIdentifier::Token(token) => token.validate().map_err(|e| nested("token", &e)),
        EntityIdentifier::EntityChain(chain) => {
            chain.validate().map_err(|e| nested("entity_chain", &e))
        }
        EntityIdentifier::RegisteredResourceValueFqn(fqn) => {
            let suffix = ".registered_resource_value_fqn";
            check_uri(suffix, fqn)?;
            FullyQualifiedRegisteredResourceValue::parse(fqn)
                .map(|_| ())
                .map_err(|e| invalid_at(suffix, e.to_string()))
        }
        EntityIdentifier::UseRequestToken(true) => Ok(()),
        EntityIdentifier::UseRequestToken(false) => {
            Err(invalid_at(".use_request_token", "must be true"))
        }
    }
}

pub(crate) fn resource_kind(resource: &Resource) -> Result<(), ValidationError> {
    match &resource.kind {
        ResourceKind::AttributeValues { fqns } => {
            let suffix = ".attribute_values.fqns";
            if fqns.is_empty() || fqns.len() > MAX_RESOURCE_FQNS {
                return Err(invalid_at(
                    suffix,
                    count_message(1, MAX_RESOURCE_FQNS, fqns.len()),
                ));
            }
            for (i, fqn) in fqns.iter().enumerate() {
                check_uri(&format!("{suffix}[{i}]"), fqn)?;
            }
            Ok(())
        }
        ResourceKind::RegisteredResourceValueFqn(fqn) => {
            let suffix = ".registered_resource_value_fqn";
            if fqn.is_empty() {
                return Err(invalid_at(suffix, "must not be empty"));
            }
            check_uri(suffix, fqn)
        }
    }
}

pub(crate) fn obligation_fqns(fqns: &[String]) -> Result<(), ValidationError> {
    for (i, fqn) in fqns.iter().enumerate() {
        FullyQualifiedObligation::parse_value(fqn).map_err(|e| invalid_at(format!("[{i}]"), e.to_string()))?;
    }
    Ok(())
}

/// Check one entity identifier reported under `field`.
pub fn validate_entity_identifier(
    field: &str,
    identifier: Option<&EntityIdentifier>,
) -> Result<(), AuthzError> {
    let Some(identifier) = identifier else {
        return Err(AuthzError::validation(field, "is required"));
    };
    entity_identifier(identifier).map_err(|err| located(field, &err))
}

pub fn validate_action(field: &str, action: &Action) -> Result<(), AuthzError> {
    action.validate().map_err(|e| into_authz_error(field, &e))
}

pub fn validate_resource(field: &str, resource: Option<&Resource>) -> Result<(), AuthzError> {
    let Some(resource) = resource else {
        return Err(AuthzError::validation(field, "is required"));
    };
    resource.validate().map_err(|e| into_authz_error(field, &e))
}

pub fn validate_fulfillable_obligations(field: &str, fqns: &[String]) -> Result<(), AuthzError> {
    if fqns.len() > MAX_FULFILLABLE_OBLIGATIONS {
        return Err(AuthzError::validation(
            field,
            count_message(0, MAX_FULFILLABLE_OBLIGATIONS, fqns.len()),
        ));
    }
    obligation_fqns(fqns).map_err(|err| located(field, &err))
}

fn located(field: &str, err: &ValidationError) -> AuthzError {
    let path = match param(err, PATH_PARAM).and_then(Value::as_str) {
        Some(suffix) => format!("{field}{suffix}"),
        None => field.to_string(),
    };
    AuthzError::validation(path, describe(err))
}

pub fn validate_get_decision(req: &GetDecisionRequest) -> Result<(), AuthzError> {
    req.validate().map_err(AuthzError::from)
}

pub fn validate_get_decision_multi_resource(
    req: &GetDecisionMultiResourceRequest,
) -> Result<(), AuthzError> {
    req.validate().map_err(AuthzError::from)
}

pub fn validate_get_decision_bulk(req: &GetDecisionBulkRequest) -> Result<(), AuthzError> {
    req.validate().map_err(AuthzError::from)
}

pub fn validate_get_entitlements(req: &GetEntitlementsRequest) -> Result<(), AuthzError> {
    req.validate().map_err(AuthzError::from)
}
