//! Access-token verification.
//!
//! [`TokenVerifier`] strips the `Bearer`/`DPoP` scheme, reads the unverified
//! `iss` claim to pick the issuer configuration, fetches the signing key from
//! a [`KeySource`], verifies signature, issuer, audience and expiry, and then
//! runs every registered [`ClaimsValidator`].

mod claims;
mod jwks;

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tracing::debug;

pub use claims::Claims;
pub use jwks::{HttpJwksSource, KeySource, StaticKeySource};

use crate::config::IssuerConfig;
use crate::error::AuthzError;

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenError {
    #[error("not of type bearer or dpop")]
    NotBearerOrDpop,

    #[error("missing issuer")]
    MissingIssuer,

    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),

    #[error("client id required")]
    ClientIdRequired,

    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    #[error("token expired")]
    TokenExpired,

    #[error("invalid audience")]
    Audience,

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("no matching key for kid {0}")]
    KeyNotFound(String),

    #[error("jwks error: {0}")]
    Jwks(String),

    #[error("claims validation failed: {0}")]
    Validator(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            JwtErrorKind::ExpiredSignature => TokenError::TokenExpired,
            JwtErrorKind::InvalidAudience => TokenError::Audience,
            JwtErrorKind::InvalidIssuer => TokenError::InvalidIssuer(err.to_string()),
            JwtErrorKind::InvalidSignature | JwtErrorKind::InvalidAlgorithm => {
                TokenError::InvalidSignature(err.to_string())
            }
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

/// Authorization scheme the token was presented with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
pub enum TokenType {
    Bearer,
    #[strum(serialize = "DPoP")]
    Dpop,
}

/// A token whose signature and registered claims have been checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedToken {
    pub raw: String,
    pub token_type: TokenType,
    pub issuer: String,
    pub client_id: String,
    pub claims: Claims,
}

/// Extra checks on a verified claim set, run in registration order.
pub trait ClaimsValidator: Send + Sync {
    fn validate(&self, issuer: &IssuerConfig, claims: &Claims) -> Result<(), TokenError>;
}

/// Requires a string `cid` or `client_id` claim that the issuer allows.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientIdValidator;

impl ClaimsValidator for ClientIdValidator {
    fn validate(&self, issuer: &IssuerConfig, claims: &Claims) -> Result<(), TokenError> {
        let client_id = client_id_of(claims)?;
        if issuer.allowed_client_ids.iter().any(|c| c == client_id) {
            Ok(())
        } else {
            Err(TokenError::InvalidClientId(client_id.to_string()))
        }
    }
}

/// `cid` wins over `client_id`; whichever is present must be a string.
pub fn client_id_of(claims: &Claims) -> Result<&str, TokenError> {
    let claim = claims.get("cid").or_else(|| claims.get("client_id"));
    match claim {
        Some(Value::String(id)) => Ok(id),
        _ => Err(TokenError::ClientIdRequired),
    }
}

/// Split an `Authorization` header value into scheme and token.
pub fn strip_scheme(header: &str) -> Result<(TokenType, &str), TokenError> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ').ok_or(TokenError::NotBearerOrDpop)?;
    let token_type = if scheme.eq_ignore_ascii_case("bearer") {
        TokenType::Bearer
    } else if scheme.eq_ignore_ascii_case("dpop") {
        TokenType::Dpop
    } else {
        return Err(TokenError::NotBearerOrDpop);
    };
    let token = rest.trim();
    if token.is_empty() {
        return Err(TokenError::Malformed("empty token".to_string()));
    }
    Ok((token_type, token))
}

/// Decode a JWT's claims without checking its signature or expiry.
///
/// Only for tokens that were already verified upstream, or to pick the
/// issuer before verification.
pub fn unverified_claims(jwt: &str) -> Result<Claims, TokenError> {
    let mut peek = Validation::default();
    peek.insecure_disable_signature_validation();
    peek.validate_exp = false;
    peek.validate_aud = false;
    peek.required_spec_claims.clear();

    let data = decode::<Value>(jwt, &DecodingKey::from_secret(&[]), &peek)?;
    Ok(Claims::from_value(data.claims))
}

/// Verifies access tokens against a fixed set of trusted issuers.
///
/// Issuers are keyed by their URL without a trailing `/`, so a token whose
/// `iss` differs from the configuration only by that slash still resolves.
/// The signing key comes from the [`KeySource`] the verifier was built with:
/// [`HttpJwksSource`] for OIDC discovery, [`StaticKeySource`] for keys known
/// up front. Signature, `iss`, `exp` and (when configured) `aud` are checked
/// by `jsonwebtoken`; every [`ClaimsValidator`] then runs in registration
/// order, starting with the client-id check every verifier carries.
///
/// Construction fails when an issuer is not a valid URL.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::{SystemTime, UNIX_EPOCH};
///
/// use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, encode};
/// use serde_json::json;
/// use tdf_authz_core::config::IssuerConfig;
/// use tdf_authz_core::token::{StaticKeySource, TokenType, TokenVerifier};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let issuer = "https://idp.example.com/realms/opentdf";
/// let keys = StaticKeySource::new().with_key(issuer, "k1", DecodingKey::from_secret(b"s3cret"));
/// let verifier = TokenVerifier::new(vec![IssuerConfig::new(issuer)], Arc::new(keys))?;
///
/// let exp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() + 300;
/// let mut header = Header::new(Algorithm::HS256);
/// header.kid = Some("k1".to_string());
/// let jwt = encode(
///     &header,
///     &json!({ "iss": issuer, "exp": exp, "client_id": "opentdf-sdk" }),
///     &EncodingKey::from_secret(b"s3cret"),
/// )?;
///
/// let verified = verifier.verify_authorization(&format!("DPoP {jwt}")).await?;
/// assert_eq!(verified.token_type, TokenType::Dpop);
/// assert_eq!(verified.client_id, "opentdf-sdk");
/// # Ok(())
/// # }
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(run()).unwrap();
/// ```
pub struct TokenVerifier {
    issuers: HashMap<String, IssuerConfig>,
    keys: Arc<dyn KeySource>,
    validators: Vec<Arc<dyn ClaimsValidator>>,
}

impl TokenVerifier {
    /// A verifier for the given issuers with the client-id validator installed.
    pub fn new(issuers: Vec<IssuerConfig>, keys: Arc<dyn KeySource>) -> Result<Self, AuthzError> {
        for issuer in &issuers {
            issuer.validate()?;
        }
        let issuers = issuers
            .into_iter()
            .map(|cfg| (cfg.issuer.trim_end_matches('/').to_string(), cfg))
            .collect();
        Ok(Self {
            issuers,
            keys,
            validators: vec![Arc::new(ClientIdValidator)],
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn ClaimsValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Verify the value of an `Authorization` header.
    pub async fn verify_authorization(&self, header: &str) -> Result<VerifiedToken, TokenError> {
        let (token_type, token) = strip_scheme(header)?;
        let mut verified = self.verify(token).await?;
        verified.token_type = token_type;
        Ok(verified)
    }

    /// Verify a bare JWT. The result carries [`TokenType::Bearer`].
    pub async fn verify(&self, jwt: &str) -> Result<VerifiedToken, TokenError> {
        let header = decode_header(jwt)?;
        let issuer = self.issuer_for(jwt)?;

        let key = self
            .keys
            .decoding_key(issuer, header.kid.as_deref(), header.alg)
            .await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[issuer.issuer.as_str()]);
        if issuer.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&issuer.audience);
        }
        validation.validate_exp = true;

        let data = decode::<Value>(jwt, &key, &validation)?;
        let claims = Claims::from_value(data.claims);

        for validator in &self.validators {
            validator.validate(issuer, &claims)?;
        }
        let client_id = client_id_of(&claims)?.to_string();

        debug!(event = "Token", phase = "Verified", issuer = %issuer.issuer, client_id = %client_id);
        Ok(VerifiedToken {
            raw: jwt.to_string(),
            token_type: TokenType::Bearer,
            issuer: issuer.issuer.clone(),
            client_id,
            claims,
        })
    }

    /// Read `iss` without verifying and look up its configuration.
    fn issuer_for(&self, jwt: &str) -> Result<&IssuerConfig, TokenError> {
        let unverified = unverified_claims(jwt)?;
        let iss = unverified
            .get_str("iss")
            .filter(|s| !s.is_empty())
            .ok_or(TokenError::MissingIssuer)?;
        self.issuers
            .get(iss.trim_end_matches('/'))
            .ok_or_else(|| TokenError::InvalidIssuer(iss.to_string()))
    }
}
