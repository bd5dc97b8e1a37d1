//! Signing-key sources for token verification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::TokenError;
use crate::config::IssuerConfig;

/// Supplies the key that verifies a token's signature.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn decoding_key(
        &self,
        issuer: &IssuerConfig,
        kid: Option<&str>,
        alg: Algorithm,
    ) -> Result<DecodingKey, TokenError>;
}

fn select_key(
    keys: &HashMap<String, DecodingKey>,
    kid: Option<&str>,
) -> Result<DecodingKey, TokenError> {
    let key = match kid {
        Some(kid) => keys.get(kid).cloned(),
        None if keys.len() == 1 => keys.values().next().cloned(),
        None => None,
    };
    key.ok_or_else(|| TokenError::KeyNotFound(kid.unwrap_or("<none>").to_string()))
}

/// In-memory keys per issuer and key id.
#[derive(Clone, Default)]
pub struct StaticKeySource {
    keys: HashMap<String, HashMap<String, DecodingKey>>,
}

impl StaticKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(
        mut self,
        issuer: impl Into<String>,
        kid: impl Into<String>,
        key: DecodingKey,
    ) -> Self {
        self.keys
            .entry(issuer.into())
            .or_default()
            .insert(kid.into(), key);
        self
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn decoding_key(
        &self,
        issuer: &IssuerConfig,
        kid: Option<&str>,
        _alg: Algorithm,
    ) -> Result<DecodingKey, TokenError> {
        let keys = self
            .keys
            .get(&issuer.issuer)
            .ok_or_else(|| TokenError::InvalidIssuer(issuer.issuer.clone()))?;
        select_key(keys, kid)
    }
}

#[derive(Debug, Deserialize)]
struct OidcDiscovery {
    issuer: String,
    jwks_uri: String,
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    expires_at: Instant,
}

/// JWKS fetched through OIDC discovery and cached per issuer.
///
/// A cached key set is reused until it is older than the issuer's refresh
/// interval (never less than 15 minutes), then fetched again on demand.
/// Fetches are single-flight per issuer: concurrent lookups of a stale
/// issuer wait for one fetch and then read its result.
#[derive(Clone)]
pub struct HttpJwksSource {
    http_client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, JwksCache>>>,
    refresh_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl HttpJwksSource {
    pub fn new() -> Result<Self, TokenError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TokenError::Jwks(format!("failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(http_client))
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            refresh_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn is_stale(&self, issuer: &str) -> bool {
        match self.cache.read().await.get(issuer) {
            None => true,
            Some(entry) => Instant::now() >= entry.expires_at,
        }
    }

    async fn refresh_lock(&self, issuer: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .lock()
            .await
            .entry(issuer.to_string())
            .or_default()
            .clone()
    }

    #[cfg(test)]
    async fn expire(&self, issuer: &str) {
        if let Some(entry) = self.cache.write().await.get_mut(issuer) {
            entry.expires_at = Instant::now();
        }
    }

    async fn refresh(&self, issuer: &IssuerConfig) -> Result<(), TokenError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.issuer.trim_end_matches('/')
        );
        debug!(event = "Jwks", phase = "Discovery", url = %discovery_url);

        let discovery: OidcDiscovery = self
            .http_client
            .get(&discovery_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| TokenError::Jwks(format!("failed to fetch OIDC discovery: {e}")))?
            .json()
            .await
            .map_err(|e| TokenError::Jwks(format!("invalid OIDC discovery response: {e}")))?;

        if discovery.issuer.trim_end_matches('/') != issuer.issuer.trim_end_matches('/') {
            return Err(TokenError::Jwks(format!(
                "issuer mismatch: expected {}, got {}",
                issuer.issuer, discovery.issuer
            )));
        }

        debug!(event = "Jwks", phase = "Fetch", url = %discovery.jwks_uri);
        let jwks: JwkSet = self
            .http_client
            .get(&discovery.jwks_uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| TokenError::Jwks(format!("failed to fetch JWKS: {e}")))?
            .json()
            .await
            .map_err(|e| TokenError::Jwks(format!("invalid JWKS response: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in &jwks.keys {
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    let kid = jwk
                        .common
                        .key_id
                        .clone()
                        .unwrap_or_else(|| "default".to_string());
                    keys.insert(kid, key);
                }
                Err(e) => warn!(event = "Jwks", phase = "Fetch", error = %e, "Skipping unusable JWK"),
            }
        }
        if keys.is_empty() {
            return Err(TokenError::Jwks("no usable keys found in JWKS".to_string()));
        }

        info!(event = "Jwks", phase = "Refresh", issuer = %issuer.issuer, key_count = keys.len());
        self.cache.write().await.insert(
            issuer.issuer.clone(),
            JwksCache {
                keys,
                expires_at: Instant::now() + issuer.jwks_refresh_interval(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl KeySource for HttpJwksSource {
    async fn decoding_key(
        &self,
        issuer: &IssuerConfig,
        kid: Option<&str>,
        _alg: Algorithm,
    ) -> Result<DecodingKey, TokenError> {
        if self.is_stale(&issuer.issuer).await {
            let lock = self.refresh_lock(&issuer.issuer).await;
            let _guard = lock.lock().await;
            if self.is_stale(&issuer.issuer).await {
                self.refresh(issuer).await?;
            } else {
                debug!(event = "Jwks", phase = "Refresh", issuer = %issuer.issuer, "Coalesced with a concurrent fetch");
            }
        }

        let cache = self.cache.read().await;
        let entry = cache
            .get(&issuer.issuer)
            .ok_or_else(|| TokenError::Jwks("JWKS cache empty after refresh".to_string()))?;
        select_key(&entry.keys, kid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OCT_KEY_B64: &str = "c2VjcmV0LWtleS1mb3ItdGVzdGluZy0xMjM0NTY3ODkw";

    async fn mount_issuer(server: &MockServer, expected_jwks_fetches: u64) -> IssuerConfig {
        mount_slow_issuer(server, expected_jwks_fetches, Duration::ZERO).await
    }

    async fn mount_slow_issuer(
        server: &MockServer,
        expected_jwks_fetches: u64,
        delay: Duration,
    ) -> IssuerConfig {
        let issuer = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "jwks_uri": format!("{issuer}/jwks"),
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "keys": [{ "kty": "oct", "kid": "k1", "alg": "HS256", "k": OCT_KEY_B64 }]
                    }))
                    .set_delay(delay),
            )
            .expect(expected_jwks_fetches)
            .mount(server)
            .await;
        IssuerConfig::new(issuer)
    }

    #[tokio::test]
    async fn test_http_source_fetches_and_caches() {
        let server = MockServer::start().await;
        let issuer = mount_issuer(&server, 1).await;
        let source = HttpJwksSource::with_client(reqwest::Client::new());

        assert!(
            source
                .decoding_key(&issuer, Some("k1"), Algorithm::HS256)
                .await
                .is_ok()
        );
        // Second lookup is served from the cache.
        assert!(
            source
                .decoding_key(&issuer, Some("k1"), Algorithm::HS256)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_fetch() {
        let server = MockServer::start().await;
        let issuer = mount_slow_issuer(&server, 1, Duration::from_millis(200)).await;
        let source = HttpJwksSource::with_client(reqwest::Client::new());

        let lookups = (0..8).map(|_| source.decoding_key(&issuer, Some("k1"), Algorithm::HS256));
        let results = futures::future::join_all(lookups).await;
        assert!(results.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_expired_keys_are_fetched_again() {
        let server = MockServer::start().await;
        let issuer = mount_issuer(&server, 2).await;
        let source = HttpJwksSource::with_client(reqwest::Client::new());

        assert!(source.decoding_key(&issuer, Some("k1"), Algorithm::HS256).await.is_ok());
        assert!(source.decoding_key(&issuer, Some("k1"), Algorithm::HS256).await.is_ok());

        source.expire(&issuer.issuer).await;
        assert!(source.decoding_key(&issuer, Some("k1"), Algorithm::HS256).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_source_unknown_kid() {
        let server = MockServer::start().await;
        let issuer = mount_issuer(&server, 1).await;
        let source = HttpJwksSource::with_client(reqwest::Client::new());

        let err = source
            .decoding_key(&issuer, Some("other"), Algorithm::HS256)
            .await
            .err();
        assert_eq!(err, Some(TokenError::KeyNotFound("other".to_string())));
    }

    #[tokio::test]
    async fn test_http_source_discovery_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let source = HttpJwksSource::with_client(reqwest::Client::new());
        let err = source
            .decoding_key(&IssuerConfig::new(server.uri()), None, Algorithm::HS256)
            .await
            .err();
        assert!(matches!(err, Some(TokenError::Jwks(_))));
    }

    #[tokio::test]
    async fn test_static_source_unknown_issuer() {
        let source = StaticKeySource::new().with_key(
            "https://idp.example.com",
            "k1",
            DecodingKey::from_secret(b"x"),
        );
        let err = source
            .decoding_key(
                &IssuerConfig::new("https://other.example.com"),
                Some("k1"),
                Algorithm::HS256,
            )
            .await
            .err();
        assert!(matches!(err, Some(TokenError::InvalidIssuer(_))));
    }
}
