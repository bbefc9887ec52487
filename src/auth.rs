use std::sync::Arc;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use rand_core::{OsRng, RngCore};
use tracing::debug;

use crate::error::ApiError;
use crate::routes::AppState;

/// Hash a password with Argon2id, returning the PHC string.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// A malformed stored hash never verifies.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// A fresh API token: 20 random bytes as 40 hex characters.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Token from an `Authorization` value using the `Bearer` or `Token` scheme.
fn token_from_header(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    match scheme {
        "Bearer" | "Token" if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// Extractor for callers allowed to modify feeds and categories.
///
/// Accepts a token listed in the configured `api_tokens` or one issued by
/// `/login`.
#[derive(Debug, Clone, Copy)]
pub struct Authenticated;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(token_from_header)
            .ok_or(ApiError::Unauthorized)?;

        if state.api_tokens.iter().any(|known| known == token) {
            return Ok(Authenticated);
        }
        if state.db.token_exists(token).await? {
            return Ok(Authenticated);
        }

        debug!("Rejected unknown API token");
        Err(ApiError::Unauthorized)
    }
}
