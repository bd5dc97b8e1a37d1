//! Inbound RPC authorization.
//!
//! [`Interceptor::authorize`] runs in front of every handler: public routes
//! pass straight through, everything else needs a verified access token and
//! an allow from the configured [`Authorizer`]. For engines that authorize on
//! resource dimensions the method's resolver runs first.

use std::collections::HashMap;
use std::sync::Arc;

use casbin::function_map::key_match;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::authz::{AuthorizationRequest, Authorizer, AuthzDecision};
use crate::config::InterceptorConfig;
use crate::error::{AuthzError, ErrorKind};
use crate::resolver::{RequestPayload, ResolverContext, ResolverRegistry};
use crate::token::{Claims, TokenVerifier, VerifiedToken};

pub const AUTHORIZATION_HEADER: &str = "authorization";

pub const ACTION_READ: &str = "read";
pub const ACTION_WRITE: &str = "write";
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_UNSAFE: &str = "unsafe";

/// One inbound call as the transport hands it over.
#[derive(Debug, Clone, Default)]
pub struct InboundCall {
    /// Full method path (`/<service>/<method>`) or HTTP route.
    pub method: String,
    /// HTTP verb for REST routes, `None` for RPC calls.
    pub http_verb: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Value,
    /// Claims from the identity provider's userinfo endpoint, when fetched.
    pub user_info: Option<Claims>,
}

impl InboundCall {
    pub fn rpc(method: impl Into<String>) -> Self {
        InboundCall {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn http(verb: impl Into<String>, route: impl Into<String>) -> Self {
        InboundCall {
            method: route.into(),
            http_verb: Some(verb.into()),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Who is calling, handed to the business logic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthContext {
    #[serde(skip)]
    pub token: Option<VerifiedToken>,
    pub client_id: Option<String>,
    pub decision: Option<AuthzDecision>,
}

impl AuthContext {
    /// Context for public routes.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_token(token: VerifiedToken) -> Self {
        AuthContext {
            client_id: Some(token.client_id.clone()),
            token: Some(token),
            decision: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.token.is_none()
    }
}

/// Action implied by an RPC method name, by prefix.
pub fn action_for_method(method: &str) -> &'static str {
    let name = method.rsplit('/').next().unwrap_or(method);
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| name.starts_with(p));
    if starts(&["Get", "List"]) {
        ACTION_READ
    } else if starts(&["Create", "Update", "Assign"]) {
        ACTION_WRITE
    } else if starts(&["Delete", "Remove", "Deactivate"]) {
        ACTION_DELETE
    } else if starts(&["Unsafe"]) {
        ACTION_UNSAFE
    } else {
        ACTION_READ
    }
}

/// Action implied by an HTTP verb.
pub fn action_for_http(verb: &str) -> &'static str {
    match verb.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" => ACTION_READ,
        "POST" | "PUT" | "PATCH" => ACTION_WRITE,
        "DELETE" => ACTION_DELETE,
        _ => ACTION_UNSAFE,
    }
}

/// Authentication and RPC authorization in front of every handler.
///
/// A call is handled in this order:
///
/// 1. Methods matching a public route (exact, or by prefix when the route
///    ends in `*`) pass with an anonymous [`AuthContext`].
/// 2. The `Authorization` header (looked up case-insensitively) must carry
///    a `Bearer` or `DPoP` token that the [`TokenVerifier`] accepts. Any
///    failure here is [`ErrorKind::Unauthenticated`].
/// 3. The action comes from the HTTP verb for HTTP routes and from the
///    method name prefix for RPCs (`Get`/`List` read, `Create`/`Update`
///    write and so on).
/// 4. When the authorizer supports resource dimensions, the resolver
///    registered for the method builds the resource context. A failing
///    resolver denies the call.
/// 5. The [`Authorizer`] decides. Engine errors become
///    [`ErrorKind::Internal`]; a deny becomes `PermissionDenied`.
///
/// On success the returned context carries the verified token, the client
/// id and the decision, for handlers to reuse.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::{SystemTime, UNIX_EPOCH};
///
/// use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, encode};
/// use serde_json::json;
/// use tdf_authz_core::config::{AuthorizerConfig, InterceptorConfig, IssuerConfig};
/// use tdf_authz_core::resolver::ResolverRegistry;
/// use tdf_authz_core::token::{StaticKeySource, TokenVerifier};
/// use tdf_authz_core::{AuthzError, InboundCall, Interceptor, new_authorizer};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let issuer = "https://idp.example.com/realms/opentdf";
/// let keys = StaticKeySource::new().with_key(issuer, "k1", DecodingKey::from_secret(b"s3cret"));
/// let verifier = TokenVerifier::new(vec![IssuerConfig::new(issuer)], Arc::new(keys))?;
/// let interceptor = Interceptor::new(
///     &InterceptorConfig::default(),
///     Arc::new(verifier),
///     new_authorizer(&AuthorizerConfig::default())?,
///     ResolverRegistry::new(),
/// );
///
/// let health = interceptor.authorize(&InboundCall::rpc("/healthz")).await?;
/// assert!(health.is_anonymous());
///
/// let list = InboundCall::rpc("/policy.attributes.AttributesService/ListAttributes");
/// assert_eq!(
///     interceptor.authorize(&list).await.err(),
///     Some(AuthzError::MissingAuthorizationHeader)
/// );
///
/// let exp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() + 300;
/// let mut header = Header::new(Algorithm::HS256);
/// header.kid = Some("k1".to_string());
/// let jwt = encode(
///     &header,
///     &json!({
///         "iss": issuer,
///         "exp": exp,
///         "client_id": "opentdf-sdk",
///         "realm_access": { "roles": ["opentdf-standard"] }
///     }),
///     &EncodingKey::from_secret(b"s3cret"),
/// )?;
/// let ctx = interceptor
///     .authorize(&list.with_header("Authorization", format!("Bearer {jwt}")))
///     .await?;
/// assert_eq!(ctx.client_id.as_deref(), Some("opentdf-sdk"));
/// # Ok(())
/// # }
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(run()).unwrap();
/// ```
pub struct Interceptor {
    public_routes: Vec<String>,
    verifier: Arc<TokenVerifier>,
    authorizer: Arc<dyn Authorizer>,
    resolvers: ResolverRegistry,
}

impl Interceptor {
    pub fn new(
        config: &InterceptorConfig,
        verifier: Arc<TokenVerifier>,
        authorizer: Arc<dyn Authorizer>,
        resolvers: ResolverRegistry,
    ) -> Self {
        Interceptor {
            public_routes: config.public_routes.clone(),
            verifier,
            authorizer,
            resolvers,
        }
    }

    /// Exact match, or prefix match for routes ending in `*`.
    pub fn is_public(&self, method: &str) -> bool {
        self.public_routes.iter().any(|route| key_match(method, route))
    }

    pub async fn authorize(&self, call: &InboundCall) -> Result<AuthContext, AuthzError> {
        if self.is_public(&call.method) {
            debug!(event = "Interceptor", phase = "Public", method = %call.method);
            return Ok(AuthContext::anonymous());
        }

        let header = call
            .header(AUTHORIZATION_HEADER)
            .ok_or(AuthzError::MissingAuthorizationHeader)?;
        let token = self
            .verifier
            .verify_authorization(header)
            .await
            .map_err(|err| {
                info!(event = "Interceptor", phase = "Authenticate", method = %call.method, error = %err);
                AuthzError::Token(err)
            })?;

        let action = match call.http_verb.as_deref() {
            Some(verb) => action_for_http(verb),
            None => action_for_method(&call.method),
        };
        let resource_context = self.resolve(call).await?;

        let request = AuthorizationRequest {
            token: token.claims.clone(),
            user_info: call.user_info.clone(),
            rpc: call.method.clone(),
            action: action.to_string(),
            resource_context,
        };
        let decision = self.authorizer.authorize(&request).await.map_err(|err| {
            error!(event = "Interceptor", phase = "Authorize", method = %call.method, error = %err);
            match err.kind() {
                ErrorKind::Internal => err,
                _ => AuthzError::Internal(err.to_string()),
            }
        })?;

        if !decision.allowed {
            info!(
                event = "Interceptor",
                phase = "Denied",
                method = %call.method,
                action,
                client_id = %token.client_id,
                reason = %decision.reason
            );
            return Err(AuthzError::PermissionDenied("permission denied".to_string()));
        }
        debug!(
            event = "Interceptor",
            phase = "Allowed",
            method = %call.method,
            action,
            reason = %decision.reason
        );

        let mut ctx = AuthContext::from_token(token);
        ctx.decision = Some(decision);
        Ok(ctx)
    }

    async fn resolve(&self, call: &InboundCall) -> Result<Option<ResolverContext>, AuthzError> {
        if !self.authorizer.supports_resource_authorization() {
            return Ok(None);
        }
        let Some(resolver) = self.resolvers.get(&call.method) else {
            return Ok(None);
        };
        let payload = RequestPayload::new(call.method.clone(), call.body.clone());
        match resolver(&payload).await {
            Ok(ctx) => Ok(Some(ctx)),
            Err(err) => {
                info!(event = "Interceptor", phase = "Resolve", method = %call.method, error = %err);
                Err(AuthzError::PermissionDenied(format!(
                    "resource resolution failed: {err}"
                )))
            }
        }
    }
}
