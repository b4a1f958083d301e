//! Content-addressed cache of generated output.
//!
//! Keys are SHA-256 fingerprints over a fixed-order JSON serialization of
//! everything that affects the generated text. Every operation degrades to a
//! miss on storage errors.

use std::sync::Arc;

use chrono::Utc;
use hookory_firestore::CacheStore;
use hookory_models::{CacheEntry, OutputFormat, ResolvedContext, TonePreset};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::metrics;

/// Style toggles that change output without being part of the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleFlags {
    pub emoji_on: bool,
    pub tone_preset: TonePreset,
}

impl From<&ResolvedContext> for StyleFlags {
    fn from(ctx: &ResolvedContext) -> Self {
        Self {
            emoji_on: ctx.emoji_on,
            tone_preset: ctx.tone_preset,
        }
    }
}

/// Canonical fingerprint input. Struct fields serialize in declaration
/// order, so the byte string never depends on map iteration.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    input: &'a str,
    context: &'a ResolvedContext,
    format: &'a str,
    emoji: bool,
    tone: &'a str,
}

/// Fingerprint a generation request.
pub fn compute_key(
    input_text: &str,
    context: &ResolvedContext,
    format: OutputFormat,
    flags: StyleFlags,
) -> String {
    let material = KeyMaterial {
        input: input_text,
        context,
        format: format.as_str(),
        emoji: flags.emoji_on,
        tone: flags.tone_preset.as_str(),
    };
    // Serializing plain structs and strings cannot fail.
    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

fn key_prefix(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

/// Best-effort cache over a [`CacheStore`].
#[derive(Clone)]
pub struct ContentCache {
    store: Arc<dyn CacheStore>,
    settings: CacheSettings,
}

impl ContentCache {
    pub fn new(store: Arc<dyn CacheStore>, settings: CacheSettings) -> Self {
        Self { store, settings }
    }

    /// Cached text for `key`, if present and younger than the TTL.
    ///
    /// Expired entries are deleted on the read that finds them.
    pub async fn get(&self, key: &str) -> Option<String> {
        let entry = match self.store.get_entry(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                return None;
            }
            Err(e) => {
                warn!(cache_key = %key_prefix(key), error = %e, "Cache read failed, treating as miss");
                metrics::record_cache_lookup("error");
                return None;
            }
        };

        if entry.is_expired(Utc::now(), self.settings.ttl) {
            debug!(cache_key = %key_prefix(key), "Cache entry expired, deleting");
            metrics::record_cache_lookup("expired");
            if let Err(e) = self.store.delete_entry(key).await {
                warn!(cache_key = %key_prefix(key), error = %e, "Failed to delete expired cache entry");
            }
            return None;
        }

        metrics::record_cache_lookup("hit");
        Some(entry.output_text)
    }

    /// Upsert an entry stamped with the current time. Errors are logged.
    pub async fn put(&self, key: &str, text: &str, provider: &str) {
        let entry = CacheEntry::new(key, text, provider, Utc::now());
        if let Err(e) = self.store.put_entry(&entry).await {
            warn!(cache_key = %key_prefix(key), error = %e, "Cache write failed");
            metrics::record_cache_write_failure();
        }
    }
}
