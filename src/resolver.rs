//! Per-method resolvers that turn an RPC request into authorization
//! dimensions.
//!
//! Services register resolvers at startup through a
//! [`ScopedResolverRegistry`], which only accepts the methods the service
//! declares. The interceptor looks resolvers up by full method path
//! (`/<service>/<method>`).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::error::AuthzError;

/// The request a resolver inspects: the method path and the decoded body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub method: String,
    #[serde(default)]
    pub body: Value,
}

impl RequestPayload {
    pub fn new(method: impl Into<String>, body: Value) -> Self {
        RequestPayload {
            method: method.into(),
            body,
        }
    }
}

/// Dimensions of one resource touched by a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ResolverResource(pub BTreeMap<String, String>);

impl ResolverResource {
    /// Set a dimension, replacing any previous value for `key`.
    pub fn add_dimension(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Everything a resolver learned about a request. A request can touch several
/// resources, e.g. moving an object between namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResolverContext {
    pub resources: Vec<ResolverResource>,
}

impl ResolverContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an empty resource and hand it back for filling in.
    pub fn add_resource(&mut self) -> &mut ResolverResource {
        self.resources.push(ResolverResource::default());
        let last = self.resources.len() - 1;
        &mut self.resources[last]
    }

    pub fn is_empty(&self) -> bool {
        self.resources.iter().all(|r| r.0.is_empty())
    }
}

pub type ResolverFn = Arc<
    dyn Fn(&RequestPayload) -> BoxFuture<'static, Result<ResolverContext, AuthzError>>
        + Send
        + Sync,
>;

/// Name and methods of a service, as declared by its RPC descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub methods: Vec<String>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, methods: &[&str]) -> Self {
        ServiceDescriptor {
            name: name.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Method path to resolver. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: Arc<RwLock<HashMap<String, ResolverFn>>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, method_path: &str) -> Option<ResolverFn> {
        self.resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method_path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scoped_for_service(&self, service: &ServiceDescriptor) -> ScopedResolverRegistry {
        ScopedResolverRegistry {
            parent: self.clone(),
            service: service.clone(),
        }
    }

    fn insert(&self, method_path: String, resolver: ResolverFn) -> Result<(), AuthzError> {
        let mut guard = self.resolvers.write()?;
        if guard.insert(method_path.clone(), resolver).is_some() {
            warn!(
                event = "Resolver",
                phase = "Register",
                method = %method_path,
                "Replacing an existing resolver"
            );
        } else {
            debug!(event = "Resolver", phase = "Register", method = %method_path);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("resolvers", &self.len())
            .finish()
    }
}

/// A view of the registry that registers under one service's methods only.
#[derive(Clone, Debug)]
pub struct ScopedResolverRegistry {
    parent: ResolverRegistry,
    service: ServiceDescriptor,
}

impl ScopedResolverRegistry {
    pub fn service_name(&self) -> &str {
        &self.service.name
    }

    pub fn register<F>(&self, method: &str, resolver: F) -> Result<(), AuthzError>
    where
        F: Fn(&RequestPayload) -> BoxFuture<'static, Result<ResolverContext, AuthzError>>
            + Send
            + Sync
            + 'static,
    {
        if !self.service.methods.iter().any(|m| m == method) {
            return Err(AuthzError::Config(format!(
                "method \"{method}\" not found in service \"{}\"",
                self.service.name
            )));
        }
        self.parent
            .insert(format!("/{}/{method}", self.service.name), Arc::new(resolver))
    }
}
