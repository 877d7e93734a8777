use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::entity::Identity;
use crate::store::{Store, StoreError};

/// Handshake-time authentication failures. All of them are fatal to the
/// connection attempt; none of them ever reach an event handler.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication token required")]
    Missing,
    #[error("Invalid token")]
    Invalid,
    #[error("User not found")]
    UnknownUser,
    #[error("Identity lookup failed: {0}")]
    Backend(#[from] StoreError),
}

/// Validates handshake tokens and resolves them to identities through a
/// read-through cache, so repeated connections from the same user do not
/// re-query the store.
pub struct IdentityVerifier {
    secret: String,
    store: Arc<dyn Store>,
    cache: Cache<Uuid, Identity>,
}

impl IdentityVerifier {
    pub fn new(secret: impl Into<String>, store: Arc<dyn Store>) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build();
        Self {
            secret: secret.into(),
            store,
            cache,
        }
    }

    /// Verify a presented credential and resolve the identity behind it.
    /// Has no side effects beyond the cache fill; the caller decides whether
    /// to register the connection.
    pub async fn verify(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::Missing)?;
        let token_data = validate_jwt(token, &self.secret).map_err(|_| AuthError::Invalid)?;

        let uid = token_data
            .claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or(AuthError::Invalid)?;
        let user_id = Uuid::parse_str(uid).map_err(|_| AuthError::Invalid)?;

        if let Some(identity) = self.cache.get(&user_id) {
            return Ok(identity);
        }

        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UnknownUser)?;
        info!("JWT token validated successfully for user: {}", user_id);

        let identity = Identity::from(&user);
        self.cache.insert(user_id, identity.clone());
        Ok(identity)
    }

    pub fn cached_identities(&self) -> u64 {
        self.cache.entry_count()
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(
    token: &str,
    secret: &str,
) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token_for(user_id: Uuid, secret: &str) -> String {
        let claims = json!({ "sub": user_id.to_string(), "exp": 4_102_444_800u64 });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn verifier() -> (IdentityVerifier, Arc<MemStore>) {
        let store = Arc::new(MemStore::new());
        let verifier = IdentityVerifier::new(SECRET, store.clone() as Arc<dyn Store>);
        (verifier, store)
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let (verifier, _store) = verifier();
        assert!(matches!(
            verifier.verify(None).await.unwrap_err(),
            AuthError::Missing
        ));
        assert!(matches!(
            verifier.verify(Some("")).await.unwrap_err(),
            AuthError::Missing
        ));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let (verifier, store) = verifier();
        let user = store.add_user("alice");
        let token = token_for(user.id, "some-other-secret");
        assert!(matches!(
            verifier.verify(Some(&token)).await.unwrap_err(),
            AuthError::Invalid
        ));
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let (verifier, _store) = verifier();
        let token = token_for(Uuid::new_v4(), SECRET);
        assert!(matches!(
            verifier.verify(Some(&token)).await.unwrap_err(),
            AuthError::UnknownUser
        ));
    }

    #[tokio::test]
    async fn valid_token_resolves_identity() {
        let (verifier, store) = verifier();
        let user = store.add_user("alice");
        let token = token_for(user.id, SECRET);

        let identity = verifier.verify(Some(&token)).await.unwrap();
        assert_eq!(identity.user_id, user.id);
        assert_eq!(identity.username, "alice");

        // Second verification is served from the cache.
        let identity = verifier.verify(Some(&token)).await.unwrap();
        assert_eq!(identity.username, "alice");
    }
}
