//! OAuth access-token cache for the Firestore REST API.
//!
//! Tokens are refreshed a minute before expiry under a write lock, so only
//! one task refreshes at a time. If a refresh fails while the old token is
//! still valid, the old token keeps being used.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

/// Refresh this long before the token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// OAuth scope granting Firestore access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }

    fn is_unexpired(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Shared token cache.
pub struct TokenCache {
    auth: Arc<dyn TokenProvider>,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(auth: Arc<dyn TokenProvider>) -> Self {
        Self {
            auth,
            cache: RwLock::new(None),
        }
    }

    /// Drop the cached token so the next call fetches a new one.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// A token that stays valid for at least the refresh margin.
    pub async fn get_token(&self) -> FirestoreResult<String> {
        if let Some(token) = self.fresh_token(&*self.cache.read().await) {
            return Ok(token);
        }

        let mut cache = self.cache.write().await;
        // Another task may have refreshed while this one waited for the lock.
        if let Some(token) = self.fresh_token(&cache) {
            return Ok(token);
        }

        match self.auth.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                // An already-expired token gets a zero TTL and is refreshed on next use.
                let ttl = (token.expires_at() - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);

                let access_token = token.as_str().to_string();
                *cache = Some(CachedToken {
                    access_token: access_token.clone(),
                    expires_at: Instant::now() + ttl,
                });
                debug!(ttl_secs = ttl.as_secs(), "Refreshed Firestore access token");
                Ok(access_token)
            }
            Err(e) => match cache.as_ref() {
                Some(cached) if cached.is_unexpired(Instant::now()) => {
                    warn!("Token refresh failed, reusing current token: {}", e);
                    Ok(cached.access_token.clone())
                }
                _ => Err(FirestoreError::auth_error(format!(
                    "Failed to obtain auth token: {}",
                    e
                ))),
            },
        }
    }

    fn fresh_token(&self, cached: &Option<CachedToken>) -> Option<String> {
        cached
            .as_ref()
            .filter(|c| c.is_fresh(Instant::now()))
            .map(|c| c.access_token.clone())
    }
}
