//! Cedar-backed authorizer.
//!
//! Requests are evaluated as:
//!
//! * principal `User::"<username>"` (or `User::"anonymous"`), a member of
//!   `Role::"<role>"` for each role found in the token, `Role::"unknown"`
//!   when there are none;
//! * action `Action::"<read|write|delete|unsafe>"`;
//! * resource `Rpc::"<method path>"`;
//! * context: one string attribute per resolver dimension.
//!
//! ```text
//! permit (principal in Role::"hr-admin", action, resource)
//! when { resource == Rpc::"/policy.attributes.AttributesService/CreateAttribute"
//!        && context has namespace && context.namespace == "hr" };
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use cedar_policy::{
    Authorizer as CedarEvaluator, Context, Decision as CedarDecision, Entities, Entity, EntityId,
    EntityTypeName, EntityUid, ParseErrors, PolicySet, Request as CedarRequest,
    RestrictedExpression,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::subjects::extract_roles;
use super::{AuthorizationRequest, Authorizer, AuthzDecision, AuthzMode};
use crate::config::AuthorizerConfig;
use crate::error::AuthzError;
use crate::types::PolicyVersion;

const ANONYMOUS: &str = "anonymous";
const UNKNOWN: &str = "unknown";

/// Compile Cedar policy text into a `PolicySet`.
///
/// ```rust
/// use tdf_authz_core::authz::compile_policy;
/// let set = compile_policy(r#"
///     permit (principal in Role::"admin", action, resource);
///     forbid (principal, action == Action::"unsafe", resource);
/// "#).unwrap();
/// assert_eq!(set.policies().count(), 2);
/// ```
pub fn compile_policy(text: &str) -> Result<PolicySet, AuthzError> {
    text.parse()
        .map_err(|e: ParseErrors| AuthzError::ParseError(e.to_string()))
}

/// Version of `text`: its SHA-256 and the load time in epoch seconds.
fn version_of(text: &str) -> PolicyVersion {
    let loaded_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    PolicyVersion {
        hash: hex::encode(Sha256::digest(text.as_bytes())),
        loaded_at: format!("{}.{:09}", loaded_at.as_secs(), loaded_at.subsec_nanos()),
    }
}

/// A compiled policy set together with its version. Never changes once built.
#[derive(Debug)]
pub struct LoadedPolicy {
    set: PolicySet,
    version: PolicyVersion,
}

impl LoadedPolicy {
    pub fn policy_set(&self) -> &PolicySet {
        &self.set
    }

    pub fn version(&self) -> &PolicyVersion {
        &self.version
    }
}

/// Cloneable and thread-safe; clones share the loaded policy.
#[derive(Clone)]
pub struct CedarAuthorizer {
    inner: Arc<RwLock<Arc<LoadedPolicy>>>,
    groups_claim: Vec<String>,
    username_claim: String,
}

fn entity_uid(type_name: &str, id: &str) -> Result<EntityUid, AuthzError> {
    Ok(EntityUid::from_type_name_and_id(
        EntityTypeName::from_str(type_name)?,
        EntityId::new(id),
    ))
}

impl CedarAuthorizer {
    pub fn new_from_str(policy_text: &str) -> Result<Self, AuthzError> {
        Self::with_claims(policy_text, &AuthorizerConfig::default())
    }

    pub fn from_config(config: &AuthorizerConfig) -> Result<Self, AuthzError> {
        let text = config
            .cedar_policy
            .as_deref()
            .ok_or_else(|| AuthzError::Config("the cedar engine requires cedar_policy".into()))?;
        Self::with_claims(text, config)
    }

    fn with_claims(policy_text: &str, config: &AuthorizerConfig) -> Result<Self, AuthzError> {
        let snapshot = LoadedPolicy {
            set: compile_policy(policy_text)?,
            version: version_of(policy_text),
        };
        info!(
            event = "Authorizer",
            phase = "Init",
            engine = "cedar",
            policies = snapshot.set.policies().count(),
            version = %snapshot.version
        );
        Ok(CedarAuthorizer {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
            groups_claim: config.groups_claim.clone(),
            username_claim: config.username_claim.clone(),
        })
    }

    /// Swap in new policy text. On a parse error the loaded policy stays.
    pub fn reload_from_str(&self, policy_text: &str) -> Result<(), AuthzError> {
        let set = match compile_policy(policy_text) {
            Ok(set) => set,
            Err(err) => {
                warn!(event = "Authorizer", phase = "Reload", error = %err, "Keeping previous policy");
                return Err(err);
            }
        };
        let snapshot = Arc::new(LoadedPolicy {
            set,
            version: version_of(policy_text),
        });
        info!(event = "Authorizer", phase = "Reload", version = %snapshot.version);
        *self.inner.write()? = snapshot;
        Ok(())
    }

    pub fn current_snapshot(&self) -> Result<Arc<LoadedPolicy>, AuthzError> {
        Ok(self.inner.read()?.clone())
    }

    pub fn current_version(&self) -> Result<PolicyVersion, AuthzError> {
        Ok(self.current_snapshot()?.version.clone())
    }

    fn evaluate(&self, req: &AuthorizationRequest) -> Result<AuthzDecision, AuthzError> {
        // 1. Principal and its roles.
        let username = req
            .token
            .get_str(&self.username_claim)
            .filter(|u| !u.is_empty())
            .unwrap_or(ANONYMOUS);
        let mut roles = extract_roles(&req.token, req.user_info.as_ref(), &self.groups_claim);
        if roles.is_empty() {
            roles.push(UNKNOWN.to_string());
        }
        let principal = entity_uid("User", username)?;
        let role_uids = roles
            .iter()
            .map(|role| entity_uid("Role", role))
            .collect::<Result<HashSet<_>, _>>()?;

        // 2. Action, resource and the dimensions as context.
        let action = entity_uid("Action", &req.action)?;
        let resource = entity_uid("Rpc", &req.rpc)?;
        let dimensions: BTreeMap<String, String> = req
            .resource_context
            .iter()
            .flat_map(|ctx| ctx.resources.iter())
            .flat_map(|r| r.0.clone())
            .collect();
        let context = Context::from_pairs(
            dimensions
                .into_iter()
                .map(|(k, v)| (k, RestrictedExpression::new_string(v))),
        )?;

        debug!(
            event = "Request",
            phase = "Parsed",
            principal = %principal,
            action = %action,
            resource = %resource,
            roles = ?roles
        );

        let cedar_req = CedarRequest::new(principal.clone(), action, resource.clone(), context, None)?;

        // 3. Entities: the principal with its roles as parents, the roles and the resource.
        let schema: Option<&cedar_policy::Schema> = None;
        let principal_entity = Entity::new(principal, HashMap::new(), role_uids.clone())?;
        let role_entities: Vec<Entity> = role_uids.into_iter().map(Entity::with_uid).collect();
        let entities = Entities::empty()
            .add_entities(vec![principal_entity, Entity::with_uid(resource)], schema)?
            .add_entities(role_entities, schema)?;

        // 4. Run the evaluator against the current snapshot.
        let snapshot = self.current_snapshot()?;
        let response = CedarEvaluator::new().is_authorized(&cedar_req, &snapshot.set, &entities);
        for err in response.diagnostics().errors() {
            warn!(event = "Request", phase = "Evaluation", error = %err);
        }

        let allowed = response.decision() == CedarDecision::Allow;
        let matched_policy = if allowed {
            response
                .diagnostics()
                .reason()
                .filter_map(|id| snapshot.set.policy(id))
                .map(|policy| policy.to_string())
                .next()
        } else {
            None
        };
        debug!(event = "Request", phase = "Result", allowed, rpc = %req.rpc);

        Ok(AuthzDecision {
            allowed,
            reason: format!(
                "cedar: {} {} {} (policy {})",
                if allowed { "allow" } else { "deny" },
                req.action,
                req.rpc,
                snapshot.version.hash
            ),
            mode: AuthzMode::V2,
            matched_policy,
        })
    }
}

impl std::fmt::Debug for CedarAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CedarAuthorizer")
            .field("version", &self.current_version().ok())
            .finish()
    }
}

#[async_trait]
impl Authorizer for CedarAuthorizer {
    async fn authorize(&self, req: &AuthorizationRequest) -> Result<AuthzDecision, AuthzError> {
        self.evaluate(req)
    }

    fn version(&self) -> AuthzMode {
        AuthzMode::V2
    }

    fn supports_resource_authorization(&self) -> bool {
        true
    }
}
