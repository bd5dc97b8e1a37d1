//! Pluggable RPC authorizers.
//!
//! An [`Authorizer`] decides whether a verified caller may invoke an RPC (or
//! HTTP route) with a given action. Engines are created by name through an
//! [`AuthorizerRegistry`]; `rbac` (policy tables, v1 and v2) and `cedar` are
//! built in, and services may register their own factories.
//!
//! ```rust
//! use tdf_authz_core::authz::{new_authorizer, AuthzMode};
//! use tdf_authz_core::config::AuthorizerConfig;
//!
//! let authorizer = new_authorizer(&AuthorizerConfig::default()).unwrap();
//! assert_eq!(authorizer.version(), AuthzMode::V1);
//! ```

mod cedar;
mod dimensions;
mod policy;
mod rbac;
mod subjects;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};

use crate::config::AuthorizerConfig;
use crate::error::AuthzError;
use crate::resolver::ResolverContext;
use crate::token::Claims;

pub use cedar::{CedarAuthorizer, LoadedPolicy, compile_policy};
pub use dimensions::{WILDCARD, dimension_match, parse_dimensions, serialize_dimensions};
pub use policy::{
    ALLOW, DEFAULT_V1_POLICY, DEFAULT_V2_POLICY, DENY, MODEL_V1, MODEL_V2, PolicyLines,
    ROLE_PREFIX, UNKNOWN_ROLE, assemble_policy, build_enforcer,
};
pub use rbac::{RbacAuthorizer, v1_resource};
pub use subjects::{extract_roles, subjects};

pub const RBAC_ENGINE: &str = "rbac";
pub const CEDAR_ENGINE: &str = "cedar";

/// Authorization model an engine implements.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthzMode {
    /// Path and action.
    #[default]
    V1,
    /// RPC path and resource dimensions.
    V2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    /// Claims of the verified access token.
    pub token: Claims,
    pub user_info: Option<Claims>,
    /// Full method path (`/<service>/<method>`) or HTTP route.
    pub rpc: String,
    pub action: String,
    /// Dimensions from the method's resolver, if one ran.
    pub resource_context: Option<ResolverContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzDecision {
    pub allowed: bool,
    pub reason: String,
    pub mode: AuthzMode,
    pub matched_policy: Option<String>,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, req: &AuthorizationRequest) -> Result<AuthzDecision, AuthzError>;

    fn version(&self) -> AuthzMode;

    /// Whether the engine looks at resolver dimensions. The interceptor only
    /// runs resolvers for engines that do.
    fn supports_resource_authorization(&self) -> bool;
}

pub type AuthorizerFactory =
    Arc<dyn Fn(&AuthorizerConfig) -> Result<Arc<dyn Authorizer>, AuthzError> + Send + Sync>;

/// Engine name to factory. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct AuthorizerRegistry {
    factories: Arc<RwLock<HashMap<String, AuthorizerFactory>>>,
}

impl AuthorizerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `rbac` and `cedar` engines.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.insert(
            RBAC_ENGINE,
            Arc::new(|config: &AuthorizerConfig| {
                Ok(Arc::new(RbacAuthorizer::new(config)?) as Arc<dyn Authorizer>)
            }),
        );
        registry.insert(
            CEDAR_ENGINE,
            Arc::new(|config: &AuthorizerConfig| {
                Ok(Arc::new(CedarAuthorizer::from_config(config)?) as Arc<dyn Authorizer>)
            }),
        );
        registry
    }

    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&AuthorizerConfig) -> Result<Arc<dyn Authorizer>, AuthzError> + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(factory));
    }

    fn insert(&self, name: &str, factory: AuthorizerFactory) {
        let mut guard = self.factories.write().unwrap_or_else(PoisonError::into_inner);
        if guard.insert(name.to_string(), factory).is_some() {
            warn!(event = "Authorizer", phase = "Register", engine = name, "Replacing an existing factory");
        } else {
            debug!(event = "Authorizer", phase = "Register", engine = name);
        }
    }

    /// Validate `config` and build the engine it names.
    pub fn create(&self, config: &AuthorizerConfig) -> Result<Arc<dyn Authorizer>, AuthzError> {
        config.validate()?;
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config.engine)
            .cloned()
            .ok_or_else(|| AuthzError::UnknownAuthorizer(config.engine.clone()))?;
        factory(config)
    }

    /// Registered engine names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for AuthorizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizerRegistry")
            .field("engines", &self.names())
            .finish()
    }
}

static DEFAULT_REGISTRY: Lazy<AuthorizerRegistry> = Lazy::new(AuthorizerRegistry::with_builtins);

/// The process-wide registry.
pub fn default_registry() -> &'static AuthorizerRegistry {
    &DEFAULT_REGISTRY
}

/// Register a factory in the process-wide registry.
pub fn register_factory<F>(name: &str, factory: F)
where
    F: Fn(&AuthorizerConfig) -> Result<Arc<dyn Authorizer>, AuthzError> + Send + Sync + 'static,
{
    DEFAULT_REGISTRY.register(name, factory);
}

/// Build an authorizer from the process-wide registry.
pub fn new_authorizer(config: &AuthorizerConfig) -> Result<Arc<dyn Authorizer>, AuthzError> {
    DEFAULT_REGISTRY.create(config)
}
