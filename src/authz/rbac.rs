//! Role-based authorizer on a casbin enforcer, in path (v1) and RPC plus
//! dimension (v2) flavors.
//!
//! Each subject of a request (its roles, then its user name) is enforced in
//! turn and the first one allowed wins. v1 asks `(subject, path, action)`,
//! v2 asks `(subject, rpc, dimensions)`.
//!
//! ```rust
//! use tdf_authz_core::authz::{Authorizer, AuthzMode, RbacAuthorizer};
//! use tdf_authz_core::config::AuthorizerConfig;
//!
//! let authorizer = RbacAuthorizer::new(&AuthorizerConfig {
//!     version: AuthzMode::V2,
//!     extension: Some("p, role:hr-admin, /policy.attributes.*, namespace=hr, allow".into()),
//!     ..Default::default()
//! })
//! .unwrap();
//! assert_eq!(authorizer.version(), AuthzMode::V2);
//! ```

use async_trait::async_trait;
use casbin::{CoreApi, Enforcer};
use tracing::{debug, error};

use super::dimensions::serialize_dimensions;
use super::policy::{
    DEFAULT_V1_POLICY, DEFAULT_V2_POLICY, MODEL_V1, MODEL_V2, PolicyLines, assemble_policy,
    build_enforcer,
};
use super::subjects::subjects;
use super::{AuthorizationRequest, Authorizer, AuthzDecision, AuthzMode};
use crate::config::AuthorizerConfig;
use crate::error::AuthzError;

/// Role-based authorizer backed by a casbin enforcer.
///
/// Subjects are the username plus every group found under the configured
/// claim paths. Each subject is enforced on its own, and the first subject
/// the policy allows wins. In v2 mode the request object is the RPC path and
/// the serialized resource dimensions are matched by `dimensionMatch`.
pub struct RbacAuthorizer {
    mode: AuthzMode,
    enforcer: Enforcer,
    groups_claim: Vec<String>,
    username_claim: String,
}

impl std::fmt::Debug for RbacAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RbacAuthorizer")
            .field("mode", &self.mode)
            .field("groups_claim", &self.groups_claim)
            .field("username_claim", &self.username_claim)
            .finish()
    }
}

/// v1 tables name gRPC methods without the leading `/` and HTTP routes with
/// it. A first path segment containing `.` marks a gRPC method.
pub fn v1_resource(rpc: &str) -> &str {
    let trimmed = rpc.trim_start_matches('/');
    let first = trimmed.split('/').next().unwrap_or_default();
    if first.contains('.') { trimmed } else { rpc }
}

/// First subject `check` allows. A subject whose check fails is logged and
/// skipped; when every subject failed the last error is returned.
fn first_allowed<'a>(
    subjects: &'a [String],
    mut check: impl FnMut(&str) -> Result<bool, AuthzError>,
) -> Result<Option<&'a str>, AuthzError> {
    let mut evaluated_any = false;
    let mut last_error = None;
    for subject in subjects {
        match check(subject) {
            Ok(true) => return Ok(Some(subject.as_str())),
            Ok(false) => evaluated_any = true,
            Err(err) => {
                error!(event = "Authorize", phase = "Enforce", subject = %subject, error = %err);
                last_error = Some(err);
            }
        }
    }
    match (evaluated_any, last_error) {
        (false, Some(err)) => Err(AuthzError::AllSubjectsErrored(err.to_string())),
        _ => Ok(None),
    }
}

impl RbacAuthorizer {
    /// Assemble the policy for `config.version` and load it into a fresh
    /// enforcer.
    pub async fn from_config(config: &AuthorizerConfig) -> Result<Self, AuthzError> {
        let (default, model) = match config.version {
            AuthzMode::V1 => (DEFAULT_V1_POLICY, MODEL_V1),
            AuthzMode::V2 => (DEFAULT_V2_POLICY, MODEL_V2),
        };
        let lines = PolicyLines::parse(&assemble_policy(default, config))?;
        let enforcer = build_enforcer(model, &lines).await?;
        debug!(
            event = "Authorizer",
            phase = "Init",
            engine = "rbac",
            mode = %config.version,
            rules = lines.policies.len(),
            groupings = lines.groupings.len()
        );
        Ok(RbacAuthorizer {
            mode: config.version,
            enforcer,
            groups_claim: config.groups_claim.clone(),
            username_claim: config.username_claim.clone(),
        })
    }

    /// Blocking form of [`RbacAuthorizer::from_config`] for factories. The
    /// in-memory adapter does no I/O, so this never parks on the runtime.
    pub fn new(config: &AuthorizerConfig) -> Result<Self, AuthzError> {
        futures::executor::block_on(Self::from_config(config))
    }

    fn subjects(&self, req: &AuthorizationRequest) -> Vec<String> {
        subjects(
            &req.token,
            req.user_info.as_ref(),
            &self.groups_claim,
            &self.username_claim,
        )
    }

    fn authorize_v1(&self, req: &AuthorizationRequest) -> Result<AuthzDecision, AuthzError> {
        let resource = v1_resource(&req.rpc);
        let subjects = self.subjects(req);
        let matched = first_allowed(&subjects, |subject| {
            Ok(self.enforcer.enforce((subject, resource, req.action.as_str()))?)
        })?;
        debug!(
            event = "Authorize",
            phase = "V1",
            resource,
            action = %req.action,
            allowed = matched.is_some()
        );
        Ok(AuthzDecision {
            allowed: matched.is_some(),
            reason: format!("v1: {} {resource}", req.action),
            mode: AuthzMode::V1,
            matched_policy: matched.map(str::to_string),
        })
    }

    fn authorize_v2(&self, req: &AuthorizationRequest) -> Result<AuthzDecision, AuthzError> {
        let subjects = self.subjects(req);
        let dims = serialize_dimensions(req.resource_context.as_ref());
        debug!(event = "Authorize", phase = "V2", rpc = %req.rpc, dims = %dims, subjects = subjects.len());

        let matched = first_allowed(&subjects, |subject| {
            Ok(self
                .enforcer
                .enforce((subject, req.rpc.as_str(), dims.as_str()))?)
        })?;
        Ok(match matched {
            Some(subject) => AuthzDecision {
                allowed: true,
                reason: format!("v2: {subject} on {} with dims={dims}", req.rpc),
                mode: AuthzMode::V2,
                matched_policy: Some(subject.to_string()),
            },
            None => AuthzDecision {
                allowed: false,
                reason: format!("v2: denied {} with dims={dims}", req.rpc),
                mode: AuthzMode::V2,
                matched_policy: None,
            },
        })
    }
}

#[async_trait]
impl Authorizer for RbacAuthorizer {
    async fn authorize(&self, req: &AuthorizationRequest) -> Result<AuthzDecision, AuthzError> {
        match self.mode {
            AuthzMode::V1 => self.authorize_v1(req),
            AuthzMode::V2 => self.authorize_v2(req),
        }
    }

    fn version(&self) -> AuthzMode {
        self.mode
    }

    fn supports_resource_authorization(&self) -> bool {
        self.mode == AuthzMode::V2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverContext;
    use crate::token::Claims;
    use serde_json::{Value, json};
    use yare::parameterized;

    fn roles(roles: &[&str]) -> Value {
        json!({ "realm_access": { "roles": roles } })
    }

    fn request(token: Value, rpc: &str, action: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            token: Claims::from_value(token),
            user_info: None,
            rpc: rpc.to_string(),
            action: action.to_string(),
            resource_context: None,
        }
    }

    fn with_dims(mut req: AuthorizationRequest, dims: &[(&str, &str)]) -> AuthorizationRequest {
        let mut ctx = ResolverContext::new();
        let resource = ctx.add_resource();
        for (k, v) in dims {
            resource.add_dimension(*k, *v);
        }
        req.resource_context = Some(ctx);
        req
    }

    fn v1(config: AuthorizerConfig) -> RbacAuthorizer {
        RbacAuthorizer::new(&config).unwrap()
    }

    fn v2(csv: &str) -> RbacAuthorizer {
        RbacAuthorizer::new(&AuthorizerConfig {
            version: AuthzMode::V2,
            csv: Some(csv.to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[parameterized(
        v1_path = { "/kas.AccessService/Rewrap", "kas.AccessService/Rewrap" },
        v1_http = { "/kas/v2/rewrap", "/kas/v2/rewrap" },
        v1_http_with_dot_later = { "/attributes/a.b", "/attributes/a.b" },
        v1_no_slash = { "policy.attributes.List", "policy.attributes.List" },
    )]
    fn test_v1_resource(rpc: &str, expected: &str) {
        assert_eq!(v1_resource(rpc), expected);
    }

    #[parameterized(
        admin_policy_read = { &["opentdf-admin"], "/policy.attributes.DoSomething", "read", true },
        admin_policy_write = { &["opentdf-admin"], "/policy.attributes.DoSomething", "write", true },
        admin_http_write = { &["opentdf-admin"], "/attributes/do/something", "write", true },
        admin_anything = { &["opentdf-admin"], "/non-existent", "read", true },
        standard_policy_read = { &["opentdf-standard"], "/policy.attributes.DoSomething", "read", true },
        standard_policy_write = { &["opentdf-standard"], "/policy.attributes.DoSomething", "write", false },
        standard_http_read = { &["opentdf-standard"], "/attributes", "read", true },
        standard_http_write = { &["opentdf-standard"], "/attributes", "write", false },
        standard_unknown_path = { &["opentdf-standard"], "/non-existent", "read", false },
        standard_rewrap = { &["opentdf-standard"], "/kas/v2/rewrap", "write", true },
        standard_decisions = { &["opentdf-standard"], "/authorization.AuthorizationService/GetDecisionsByToken", "read", true },
        unknown_policy_read = { &[], "/policy.attributes.DoSomething", "read", false },
        unknown_http_read = { &[], "/attributes", "read", false },
        unknown_rewrap = { &[], "/kas.AccessService/Rewrap", "write", true },
    )]
    fn test_v1_default_policy(token_roles: &[&str], rpc: &str, action: &str, allowed: bool) {
        let authorizer = v1(AuthorizerConfig::default());
        let decision = authorizer.authorize_v1(&request(roles(token_roles), rpc, action)).unwrap();
        assert_eq!(decision.allowed, allowed, "{}", decision.reason);
        assert_eq!(decision.mode, AuthzMode::V1);
    }

    #[test]
    fn test_v1_reason() {
        let decision = v1(AuthorizerConfig::default())
            .authorize_v1(&request(roles(&["opentdf-admin"]), "/kas.AccessService/Rewrap", "write"))
            .unwrap();
        insta::assert_snapshot!(decision.reason, @"v1: write kas.AccessService/Rewrap");
        assert_eq!(decision.matched_policy.as_deref(), Some("role:opentdf-admin"));
    }

    #[test]
    fn test_v1_role_map() {
        let authorizer = v1(AuthorizerConfig {
            role_map: [("admin".to_string(), "test-admin".to_string())].into(),
            ..Default::default()
        });
        let mapped = request(roles(&["test-admin"]), "/policy.attributes.Update", "write");
        assert!(authorizer.authorize_v1(&mapped).unwrap().allowed);
        let old = request(roles(&["opentdf-admin"]), "/policy.attributes.Update", "write");
        assert!(!authorizer.authorize_v1(&old).unwrap().allowed);
    }

    #[test]
    fn test_v1_username_subject() {
        let authorizer = v1(AuthorizerConfig {
            extension: Some("p, casbin-user, new.service.*, read, allow".to_string()),
            ..Default::default()
        });
        let token = json!({ "preferred_username": "casbin-user" });
        assert!(
            authorizer
                .authorize_v1(&request(token.clone(), "/new.service.DoSomething", "read"))
                .unwrap()
                .allowed
        );
        assert!(
            !authorizer
                .authorize_v1(&request(token, "/policy.attributes.List", "read"))
                .unwrap()
                .allowed
        );
    }

    #[test]
    fn test_v1_user_info_roles() {
        let authorizer = v1(AuthorizerConfig {
            extension: Some("p, role:admin, resource, read, allow".to_string()),
            ..Default::default()
        });
        let mut req = request(roles(&["other"]), "resource", "read");
        assert!(!authorizer.authorize_v1(&req).unwrap().allowed);
        req.user_info = Some(Claims::from_value(roles(&["admin"])));
        assert!(authorizer.authorize_v1(&req).unwrap().allowed);
    }

    #[test]
    fn test_malformed_extension_fails_construction() {
        let err = RbacAuthorizer::new(&AuthorizerConfig {
            extension: Some("p, role:admin, new.service.DoSomething, *".to_string()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, AuthzError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_v2_admin_wildcard() {
        let authorizer = v2("p, role:admin, *, *, allow");
        let req = with_dims(
            request(
                roles(&["admin"]),
                "/policy.attributes.AttributesService/UpdateAttribute",
                "write",
            ),
            &[("namespace", "hr"), ("attribute", "classification")],
        );
        let decision = authorizer.authorize(&req).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.mode, AuthzMode::V2);
        assert_eq!(decision.matched_policy.as_deref(), Some("role:admin"));
        insta::assert_snapshot!(decision.reason, @"v2: role:admin on /policy.attributes.AttributesService/UpdateAttribute with dims=attribute=classification&namespace=hr");
    }

    #[parameterized(
        same_namespace = { "hr", true },
        other_namespace = { "finance", false },
    )]
    fn test_v2_namespace_scope(namespace: &str, allowed: bool) {
        let authorizer =
            v2("p, role:hr-admin, /policy.attributes.AttributesService/*, namespace=hr, allow");
        let req = with_dims(
            request(
                roles(&["hr-admin"]),
                "/policy.attributes.AttributesService/CreateAttribute",
                "write",
            ),
            &[("namespace", namespace)],
        );
        let decision = authorizer.authorize_v2(&req).unwrap();
        assert_eq!(decision.allowed, allowed);
        if !allowed {
            insta::assert_snapshot!(decision.reason, @"v2: denied /policy.attributes.AttributesService/CreateAttribute with dims=namespace=finance");
        }
    }

    #[test]
    fn test_v2_keeps_leading_slash() {
        let authorizer = v2("p, role:x, policy.*, *, allow");
        let req = request(roles(&["x"]), "/policy.attributes.AttributesService/Get", "read");
        assert!(!authorizer.authorize_v2(&req).unwrap().allowed);
    }

    #[test]
    fn test_v2_groupings_apply_to_bare_roles() {
        let authorizer = v2("p, role:admin, *, *, allow\ng, opentdf-admin, role:admin");
        let req = request(roles(&["opentdf-admin"]), "/anything.Service/Do", "write");
        let decision = authorizer.authorize_v2(&req).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.matched_policy.as_deref(), Some("role:opentdf-admin"));
    }

    fn subject_list(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_subjects_errored_is_internal() {
        let subjects = subject_list(&["role:a", "bob"]);
        let err = first_allowed(&subjects, |_| Err(AuthzError::EvalError("boom".into())))
            .unwrap_err();
        assert!(matches!(err, AuthzError::AllSubjectsErrored(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }

    #[test]
    fn test_one_subject_errored_is_deny() {
        let subjects = subject_list(&["role:a", "bob"]);
        let matched = first_allowed(&subjects, |subject| match subject {
            "role:a" => Err(AuthzError::EvalError("boom".into())),
            _ => Ok(false),
        })
        .unwrap();
        assert_eq!(matched, None);
    }

    #[test]
    fn test_errored_subject_skipped_for_later_allow() {
        let subjects = subject_list(&["role:a", "bob"]);
        let matched = first_allowed(&subjects, |subject| match subject {
            "role:a" => Err(AuthzError::EvalError("boom".into())),
            _ => Ok(true),
        })
        .unwrap();
        assert_eq!(matched, Some("bob"));
    }

    #[test]
    fn test_v1_deny_row_for_role() {
        let authorizer = v1(AuthorizerConfig {
            csv: Some(
                "p, role:standard, new.hello.*, *, allow\n\
                 p, role:standard, new.hello.*, write, deny\n\
                 g, opentdf-standard, role:standard"
                    .to_string(),
            ),
            ..Default::default()
        });
        let token = roles(&["opentdf-standard"]);
        let read = request(token.clone(), "/new.hello.World", "read");
        let write = request(token, "/new.hello.World", "write");
        assert!(authorizer.authorize_v1(&read).unwrap().allowed);
        assert!(!authorizer.authorize_v1(&write).unwrap().allowed);
    }

    #[test]
    fn test_resource_authorization_only_in_v2() {
        assert!(!v1(AuthorizerConfig::default()).supports_resource_authorization());
        assert!(v2("p, role:a, *, *, allow").supports_resource_authorization());
    }
}
