//! Entity resolution: from identifiers to the property bags that subject
//! mappings are evaluated against.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::AuthzError;
use crate::token::{Claims, TokenVerifier, client_id_of, unverified_claims};
use crate::types::{Entity, EntityChain, EntityKind, EntityRepresentation, Token};

/// Resolves entities to representations. Deployments plug in their own
/// (directory lookups, user info enrichment); [`ClaimsEntityResolver`] is the
/// built-in one.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    async fn entity_chain_from_token(&self, token: &Token) -> Result<EntityChain, AuthzError>;

    async fn resolve_entities(
        &self,
        chain: &EntityChain,
    ) -> Result<Vec<EntityRepresentation>, AuthzError>;
}

/// The chain a claim set stands for: one subject entity carrying the claims,
/// plus an environment entity for the client when the token names one.
pub fn chain_from_claims(ephemeral_id: &str, claims: &Claims) -> EntityChain {
    let mut entities = vec![Entity::subject(
        &format!("{ephemeral_id}-subject"),
        EntityKind::Claims(claims.clone().into_value()),
    )];
    if let Ok(client_id) = client_id_of(claims) {
        entities.push(Entity::environment(
            &format!("{ephemeral_id}-client"),
            EntityKind::ClientId(client_id.to_string()),
        ));
    }
    EntityChain {
        ephemeral_id: ephemeral_id.to_string(),
        entities,
    }
}

/// Property bag of one entity.
pub fn entity_properties(entity: &Entity) -> Map<String, Value> {
    let value = match &entity.kind {
        EntityKind::Claims(claims) => claims.clone(),
        EntityKind::EmailAddress(email) => json!({ "email_address": email }),
        EntityKind::UserName(name) => json!({ "user_name": name }),
        EntityKind::ClientId(id) => json!({ "client_id": id }),
    };
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Resolves from the information already in the request: token claims and
/// the typed fields of chain entities.
///
/// Tokens passed in request bodies are decoded without verification unless a
/// verifier is attached with [`ClaimsEntityResolver::with_verifier`].
#[derive(Default)]
pub struct ClaimsEntityResolver {
    verifier: Option<Arc<TokenVerifier>>,
}

impl ClaimsEntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verifier(mut self, verifier: Arc<TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

#[async_trait]
impl EntityResolver for ClaimsEntityResolver {
    async fn entity_chain_from_token(&self, token: &Token) -> Result<EntityChain, AuthzError> {
        let claims = match &self.verifier {
            Some(verifier) => verifier.verify(&token.jwt).await?.claims,
            None => unverified_claims(&token.jwt)?,
        };
        debug!(
            event = "EntityResolution",
            phase = "Token",
            ephemeral_id = %token.ephemeral_id,
            claims = claims.as_map().len()
        );
        Ok(chain_from_claims(&token.ephemeral_id, &claims))
    }

    async fn resolve_entities(
        &self,
        chain: &EntityChain,
    ) -> Result<Vec<EntityRepresentation>, AuthzError> {
        Ok(chain
            .entities
            .iter()
            .enumerate()
            .map(|(idx, entity)| {
                let original_id = if entity.ephemeral_id.is_empty() {
                    format!("{}-{idx}", chain.ephemeral_id)
                } else {
                    entity.ephemeral_id.clone()
                };
                EntityRepresentation {
                    original_id,
                    additional_props: vec![entity_properties(entity)],
                    direct_entitlements: Vec::new(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};

    #[tokio::test]
    async fn test_token_to_chain_without_verifier() {
        let claims = json!({
            "iss": "https://idp.example.com",
            "cid": "alpha",
            "realm_access": { "roles": ["user"] }
        });
        let jwt = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"irrelevant"),
        )
        .unwrap();
        let resolver = ClaimsEntityResolver::new();
        let chain = resolver
            .entity_chain_from_token(&Token {
                ephemeral_id: "tok".into(),
                jwt,
            })
            .await
            .unwrap();

        assert_eq!(chain.ephemeral_id, "tok");
        assert_eq!(chain.entities.len(), 2);
        assert!(!chain.entities[0].is_environment());
        assert_eq!(chain.entities[1].kind, EntityKind::ClientId("alpha".into()));
        assert!(chain.entities[1].is_environment());
    }

    #[tokio::test]
    async fn test_malformed_token_is_unauthenticated() {
        let err = ClaimsEntityResolver::new()
            .entity_chain_from_token(&Token {
                ephemeral_id: "tok".into(),
                jwt: "not-a-jwt".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn test_resolve_typed_entities() {
        let chain = EntityChain {
            ephemeral_id: "chain".into(),
            entities: vec![
                Entity::subject("", EntityKind::EmailAddress("alice@example.com".into())),
                Entity::subject("u", EntityKind::UserName("alice".into())),
            ],
        };
        let reps = ClaimsEntityResolver::new()
            .resolve_entities(&chain)
            .await
            .unwrap();
        assert_eq!(reps[0].original_id, "chain-0");
        assert_eq!(reps[0].additional_props[0]["email_address"], json!("alice@example.com"));
        assert_eq!(reps[1].original_id, "u");
        assert_eq!(reps[1].additional_props[0]["user_name"], json!("alice"));
    }
}
