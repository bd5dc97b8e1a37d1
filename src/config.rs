//! Configuration for the cache, the token verifier, the authorizer, the
//! interceptor and the decision service.
//!
//! Every struct deserializes with defaults for absent fields and exposes a
//! `validate()` that the consuming component calls at construction.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::authz::AuthzMode;
use crate::error::AuthzError;

pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const MIN_JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub refresh_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn validate(&self) -> Result<(), AuthzError> {
        if !self.enabled {
            return Ok(());
        }
        if self.refresh_interval_secs == 0 {
            return Err(AuthzError::CacheDisabled);
        }
        let interval = self.refresh_interval();
        if interval < MIN_REFRESH_INTERVAL || interval > MAX_REFRESH_INTERVAL {
            return Err(AuthzError::Config(format!(
                "cache refresh interval must be between {}s and {}s, got {}s",
                MIN_REFRESH_INTERVAL.as_secs(),
                MAX_REFRESH_INTERVAL.as_secs(),
                self.refresh_interval_secs
            )));
        }
        Ok(())
    }
}

/// A trusted token issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    pub issuer: String,
    pub audience: Vec<String>,
    pub allowed_client_ids: Vec<String>,
    pub jwks_refresh_interval_secs: u64,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: Vec::new(),
            allowed_client_ids: Vec::new(),
            jwks_refresh_interval_secs: MIN_JWKS_REFRESH_INTERVAL.as_secs(),
        }
    }
}

impl IssuerConfig {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            ..Default::default()
        }
    }

    /// Configured JWKS refresh interval, never below 15 minutes.
    pub fn jwks_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_refresh_interval_secs).max(MIN_JWKS_REFRESH_INTERVAL)
    }

    pub fn validate(&self) -> Result<(), AuthzError> {
        url::Url::parse(&self.issuer)
            .map_err(|e| AuthzError::Config(format!("invalid issuer '{}': {e}", self.issuer)))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizerConfig {
    /// Registered engine name, `rbac` or `cedar` out of the box.
    pub engine: String,
    pub version: AuthzMode,
    /// Claim paths searched for roles, in order.
    pub groups_claim: Vec<String>,
    pub username_claim: String,
    /// Internal role name to external group name.
    pub role_map: HashMap<String, String>,
    /// Replaces the built-in default policy table.
    pub builtin: Option<String>,
    /// Full policy table; when set, the default policy is not used.
    pub csv: Option<String>,
    /// Lines appended to the default policy table.
    pub extension: Option<String>,
    pub cedar_policy: Option<String>,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            engine: "rbac".to_string(),
            version: AuthzMode::V1,
            groups_claim: vec!["realm_access.roles".to_string()],
            username_claim: "preferred_username".to_string(),
            role_map: HashMap::new(),
            builtin: None,
            csv: None,
            extension: None,
            cedar_policy: None,
        }
    }
}

impl AuthorizerConfig {
    pub fn validate(&self) -> Result<(), AuthzError> {
        if self.engine.trim().is_empty() {
            return Err(AuthzError::Config("authorizer engine must be set".to_string()));
        }
        if self.engine == "cedar" && self.cedar_policy.is_none() {
            return Err(AuthzError::Config(
                "the cedar engine requires cedar_policy".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Method paths, optionally ending in `*`, that skip authentication.
    pub public_routes: Vec<String>,
}

pub const DEFAULT_PUBLIC_ROUTES: &[&str] = &[
    "/healthz",
    "/.well-known/opentdf-configuration",
    "/wellknownconfiguration.WellKnownService/GetWellKnownConfiguration",
    "/grpc.health.v1.Health/Check",
    "/kas.AccessService/PublicKey",
    "/kas.AccessService/LegacyPublicKey",
    "/kas.AccessService/Info",
    "/kas/kas_public_key",
    "/kas/v2/kas_public_key",
];

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            public_routes: DEFAULT_PUBLIC_ROUTES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    /// Let entity representations carry entitlements directly.
    pub allow_direct_entitlements: bool,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), AuthzError> {
        self.cache.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        default = { true, 30, true },
        min = { true, 15, true },
        max = { true, 3600, true },
        too_small = { true, 14, false },
        too_large = { true, 3601, false },
        disabled_ignores_interval = { false, 1, true },
    )]
    fn test_cache_config_bounds(enabled: bool, secs: u64, ok: bool) {
        let cfg = CacheConfig {
            enabled,
            refresh_interval_secs: secs,
        };
        assert_eq!(cfg.validate().is_ok(), ok);
    }

    #[test]
    fn test_cache_config_zero_is_disabled() {
        let cfg = CacheConfig {
            enabled: true,
            refresh_interval_secs: 0,
        };
        assert_eq!(cfg.validate(), Err(AuthzError::CacheDisabled));
    }

    #[test]
    fn test_jwks_interval_clamped() {
        let cfg = IssuerConfig {
            jwks_refresh_interval_secs: 10,
            ..IssuerConfig::new("https://idp.example.com")
        };
        assert_eq!(cfg.jwks_refresh_interval(), MIN_JWKS_REFRESH_INTERVAL);
        assert!(cfg.validate().is_ok());
        assert!(IssuerConfig::new("not a url").validate().is_err());
    }

    #[test]
    fn test_authorizer_config_from_json() {
        let cfg: AuthorizerConfig = serde_json::from_str(
            r#"{ "version": "v2", "role_map": { "admin": "my-admins" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.engine, "rbac");
        assert_eq!(cfg.version, AuthzMode::V2);
        assert_eq!(cfg.groups_claim, vec!["realm_access.roles"]);
        assert_eq!(cfg.role_map.get("admin").map(String::as_str), Some("my-admins"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_cedar_requires_policy() {
        let cfg = AuthorizerConfig {
            engine: "cedar".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_default_public_routes() {
        let cfg = InterceptorConfig::default();
        assert!(cfg.public_routes.iter().any(|r| r == "/healthz"));
        assert_eq!(cfg.public_routes.len(), DEFAULT_PUBLIC_ROUTES.len());
    }
}
