use cedar_policy::{
    ContextCreationError, EntityAttrEvaluationError, ParseErrors, RequestValidationError,
};
use cedar_policy_core::entities::err::EntitiesError;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::identifier::IdentifierError;
use crate::token::TokenError;

/// Caller-facing message for engine and system failures.
pub const GENERIC_INTERNAL_MESSAGE: &str = "internal error";
/// Caller-facing message for every authentication failure.
pub const GENERIC_UNAUTHENTICATED_MESSAGE: &str = "unauthenticated";

/// Error taxonomy, independent of the concrete failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Internal,
}

/// Transport status a given kind surfaces as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, Serialize, Deserialize)]
pub enum Status {
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> Status {
        match self {
            ErrorKind::Validation => Status::InvalidArgument,
            ErrorKind::Unauthenticated => Status::Unauthenticated,
            ErrorKind::PermissionDenied => Status::PermissionDenied,
            ErrorKind::NotFound => Status::NotFound,
            ErrorKind::Internal => Status::Internal,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthzError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("missing authorization header")]
    MissingAuthorizationHeader,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("resolver failed: {0}")]
    Resolver(String),

    #[error("resource FQNs not found: {0}")]
    FqnNotFound(String),

    #[error("attribute definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("registered resource value not found: {0}")]
    RegisteredResourceValueNotFound(String),

    #[error("unspecified or unknown attribute rule on {0}")]
    InvalidAttributeRule(String),

    #[error("entity resolution failed: {0}")]
    EntityResolution(String),

    #[error("policy store error: {0}")]
    Store(String),

    #[error("entitlement policy cache is disabled (refresh interval is 0 seconds)")]
    CacheDisabled,

    #[error("entitlement policy refresh timed out: {0}")]
    RefreshTimeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse policy: {0}")]
    ParseError(String),

    #[error("evaluation error: {0}")]
    EvalError(String),

    #[error("context creation error: {0}")]
    ContextError(String),

    #[error("entity error: {0}")]
    EntityError(String),

    #[error("poisoned lock error: {0}")]
    PoisonedLock(String),

    #[error("unknown authorizer engine: {0}")]
    UnknownAuthorizer(String),

    #[error("all subjects failed policy evaluation: {0}")]
    AllSubjectsErrored(String),

    #[error("no decisions returned")]
    NoDecisions,

    #[error("decision cannot be nil")]
    DecisionCannotBeNil,

    #[error("no decision results returned")]
    DecisionMustHaveResults,

    #[error("inconsistent decisions across entity representations: {0}")]
    Consolidation(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("http error: {0}")]
    Http(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AuthzError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthzError::Identifier(_) | AuthzError::Validation { .. } => ErrorKind::Validation,
            AuthzError::Token(_) | AuthzError::MissingAuthorizationHeader => {
                ErrorKind::Unauthenticated
            }
            AuthzError::PermissionDenied(_) | AuthzError::Resolver(_) => {
                ErrorKind::PermissionDenied
            }
            AuthzError::FqnNotFound(_)
            | AuthzError::DefinitionNotFound(_)
            | AuthzError::RegisteredResourceValueNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> Status {
        self.kind().status()
    }

    /// Text safe to return to a caller. Authentication and system failures
    /// collapse to fixed strings; the detailed error belongs in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Unauthenticated => match self {
                AuthzError::MissingAuthorizationHeader => self.to_string(),
                _ => GENERIC_UNAUTHENTICATED_MESSAGE.to_string(),
            },
            ErrorKind::Internal => GENERIC_INTERNAL_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<RequestValidationError> for AuthzError {
    fn from(err: RequestValidationError) -> Self {
        AuthzError::EvalError(err.to_string())
    }
}

impl From<ParseErrors> for AuthzError {
    fn from(err: ParseErrors) -> Self {
        AuthzError::ParseError(err.to_string())
    }
}

impl From<ContextCreationError> for AuthzError {
    fn from(err: ContextCreationError) -> Self {
        AuthzError::ContextError(err.to_string())
    }
}

impl From<EntityAttrEvaluationError> for AuthzError {
    fn from(err: EntityAttrEvaluationError) -> Self {
        AuthzError::EvalError(err.to_string())
    }
}

impl From<EntitiesError> for AuthzError {
    fn from(err: EntitiesError) -> Self {
        AuthzError::EntityError(err.to_string())
    }
}

impl From<casbin::Error> for AuthzError {
    fn from(err: casbin::Error) -> Self {
        AuthzError::EvalError(err.to_string())
    }
}

impl From<reqwest::Error> for AuthzError {
    fn from(err: reqwest::Error) -> Self {
        AuthzError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for AuthzError {
    fn from(err: serde_json::Error) -> Self {
        AuthzError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AuthzError {
    fn from(errors: validator::ValidationErrors) -> Self {
        crate::validation::into_authz_error("", &errors)
    }
}

impl From<url::ParseError> for AuthzError {
    fn from(err: url::ParseError) -> Self {
        AuthzError::validation("uri", err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthzError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthzError::Token(TokenError::from(err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for AuthzError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        AuthzError::PoisonedLock(err.to_string())
    }
}
