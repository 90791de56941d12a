//! Google ID token authentication.
//!
//! The web app and the browser extension both sign in with Google and send
//! the ID token as a bearer token. Tokens are verified locally against
//! Google's JWKS; any of the configured OAuth client IDs is accepted as the
//! audience.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Google's signing keys for OAuth ID tokens.
pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// JWKS cache TTL.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Minimum gap between refreshes triggered by unknown key IDs.
const UNKNOWN_KID_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Decoded Google ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleClaims {
    pub sub: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// A verified caller identity.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl From<GoogleClaims> for AuthUser {
    fn from(claims: GoogleClaims) -> Self {
        Self {
            uid: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified.unwrap_or(false),
        }
    }
}

/// Verifies a bearer token and returns the caller.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthUser, ApiError>;
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkKey {
    kid: String,
    n: String,
    e: String,
}

struct KeySet {
    keys: HashMap<String, DecodingKey>,
    refreshed_at: Option<Instant>,
}

/// Verifies Google ID tokens with cached JWKS keys.
pub struct GoogleIdTokenVerifier {
    http: Client,
    jwks_url: String,
    audiences: Vec<String>,
    keys: RwLock<KeySet>,
}

impl GoogleIdTokenVerifier {
    pub fn new(audiences: Vec<String>) -> Result<Self, ApiError> {
        Self::with_jwks_url(audiences, GOOGLE_JWKS_URL)
    }

    pub fn with_jwks_url(audiences: Vec<String>, jwks_url: impl Into<String>) -> Result<Self, ApiError> {
        if audiences.is_empty() {
            return Err(ApiError::internal("GOOGLE_CLIENT_IDS is not configured"));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            jwks_url: jwks_url.into(),
            audiences,
            keys: RwLock::new(KeySet {
                keys: HashMap::new(),
                refreshed_at: None,
            }),
        })
    }

    async fn refresh_keys(&self) -> Result<(), ApiError> {
        debug!("Refreshing JWKS keys");

        let jwks: JwksResponse = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ApiError::internal(format!("JWKS fetch failed: {}", e)))?
            .json()
            .await
            .map_err(|e| ApiError::internal(format!("JWKS parse failed: {}", e)))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(e) => warn!(kid = %jwk.kid, "Skipping unusable JWKS key: {}", e),
            }
        }

        let key_count = keys.len();
        *self.keys.write().await = KeySet {
            keys,
            refreshed_at: Some(Instant::now()),
        };
        debug!("Refreshed {} JWKS keys", key_count);
        Ok(())
    }

    async fn get_key(&self, kid: &str) -> Option<DecodingKey> {
        let (key, age) = {
            let set = self.keys.read().await;
            (set.keys.get(kid).cloned(), set.refreshed_at.map(|t| t.elapsed()))
        };

        let needs_refresh = match (&key, age) {
            (_, None) => true,
            (Some(_), Some(age)) => age > JWKS_CACHE_TTL,
            // Google rotated keys; refresh, but not on every bad token
            (None, Some(age)) => age > UNKNOWN_KID_REFRESH_INTERVAL,
        };

        if !needs_refresh {
            return key;
        }
        if let Err(e) = self.refresh_keys().await {
            warn!("Failed to refresh JWKS keys: {}", e);
            return key;
        }
        self.keys.read().await.keys.get(kid).cloned()
    }
}

#[async_trait]
impl IdentityVerifier for GoogleIdTokenVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser, ApiError> {
        let header = decode_header(token)
            .map_err(|e| ApiError::unauthorized(format!("Invalid token header: {}", e)))?;

        let kid = header
            .kid
            .ok_or_else(|| ApiError::unauthorized("Token missing key ID"))?;

        let key = self
            .get_key(&kid)
            .await
            .ok_or_else(|| ApiError::unauthorized("Unknown key ID"))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_audience(self.audiences.as_slice());

        let data = decode::<GoogleClaims>(token, &key, &validation)
            .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))?;

        Ok(AuthUser::from(data.claims))
    }
}

/// Axum extractor for authenticated user.
#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))?;

        state.verifier.verify(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_audience() {
        assert!(GoogleIdTokenVerifier::new(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_rejects_garbage_token() {
        let verifier = GoogleIdTokenVerifier::new(vec!["client.apps.googleusercontent.com".into()]).unwrap();
        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
