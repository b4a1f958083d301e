//! Content cache entry.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default lifetime of a cache entry.
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 30;

/// Generated output stored under a content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Lowercase hex SHA-256 fingerprint.
    pub key: String,
    pub output_text: String,
    /// Generation backend that produced the output.
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        output_text: impl Into<String>,
        provider: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            output_text: output_text.into(),
            provider: provider.into(),
            created_at,
        }
    }

    /// An entry is expired once `ttl` has fully elapsed since creation.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now >= self.created_at + ttl
    }
}
