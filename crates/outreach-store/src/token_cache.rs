//! Token caching for Firestore authentication.
//!
//! Provides a thread-safe, async-aware token cache with:
//! - Refresh margin to avoid token expiry during requests
//! - Single-flight refresh under a write lock
//! - Fallback to the existing token while it is still usable
//!
//! The emulator accepts any bearer token, so it gets a fixed one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

// =============================================================================
// Constants
// =============================================================================

/// Refresh margin: refresh token 60 seconds before expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Conservative token TTL when expiry is unknown (50 minutes).
const TOKEN_DEFAULT_TTL: Duration = Duration::from_secs(50 * 60);

/// OAuth scope for Firestore/Datastore access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

/// Bearer token the Firestore emulator treats as an admin.
pub const EMULATOR_TOKEN: &str = "owner";

// =============================================================================
// Token Cache
// =============================================================================

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }

    fn is_usable(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Where access tokens come from.
pub enum TokenSource {
    /// Service-account credentials via gcp_auth.
    Provider(Arc<dyn TokenProvider>),
    /// A fixed token (emulator, tests).
    Static(String),
}

/// Thread-safe token cache with single-flight refresh.
pub struct TokenCache {
    source: TokenSource,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
        }
    }

    /// Cache for the local emulator.
    pub fn emulator() -> Self {
        Self::new(TokenSource::Static(EMULATOR_TOKEN.to_string()))
    }

    /// Invalidate the cached token.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_token(&self) -> FirestoreResult<String> {
        let auth = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Provider(auth) => auth,
        };

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;

        // Another task may have refreshed while we waited
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid() {
                return Ok(cached.access_token.clone());
            }
        }

        match auth.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                let access_token = token.as_str().to_string();

                let now = Utc::now();
                let exp = token.expires_at();
                let expires_at = if exp > now {
                    match (exp - now).to_std() {
                        Ok(ttl) => Instant::now() + ttl,
                        Err(_) => Instant::now() + TOKEN_DEFAULT_TTL,
                    }
                } else {
                    Instant::now()
                };

                *cache = Some(CachedToken {
                    access_token: access_token.clone(),
                    expires_at,
                });

                debug!("Refreshed Firestore auth token");
                Ok(access_token)
            }
            Err(e) => {
                if let Some(cached) = cache.as_ref() {
                    if cached.is_usable() {
                        warn!("Token refresh failed, using existing token: {}", e);
                        return Ok(cached.access_token.clone());
                    }
                }

                Err(FirestoreError::auth_error(format!(
                    "Failed to obtain auth token: {}",
                    e
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_is_returned_after_invalidate() {
        let cache = TokenCache::emulator();
        assert_eq!(cache.get_token().await.unwrap(), EMULATOR_TOKEN);
        cache.invalidate().await;
        assert_eq!(cache.get_token().await.unwrap(), EMULATOR_TOKEN);
    }

    #[test]
    fn test_firestore_scope() {
        assert!(FIRESTORE_SCOPE.contains("datastore"));
    }
}
