//! Generated-output cache persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use hookory_models::CacheEntry;
use tracing::debug;

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{ToFirestoreValue, Value};

/// Collection holding cache entries, keyed by fingerprint.
pub const CACHE_COLLECTION: &str = "generation_cache";

/// Storage for cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_entry(&self, key: &str) -> FirestoreResult<Option<CacheEntry>>;

    /// Insert or overwrite the entry at `entry.key`.
    async fn put_entry(&self, entry: &CacheEntry) -> FirestoreResult<()>;

    async fn delete_entry(&self, key: &str) -> FirestoreResult<()>;
}

/// Firestore-backed cache store.
#[derive(Clone)]
pub struct FirestoreCacheStore {
    client: FirestoreClient,
}

impl FirestoreCacheStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    fn to_fields(entry: &CacheEntry) -> HashMap<String, Value> {
        let mut fields = HashMap::new();
        fields.insert("outputText".to_string(), entry.output_text.to_firestore_value());
        fields.insert("provider".to_string(), entry.provider.to_firestore_value());
        fields.insert("createdAt".to_string(), entry.created_at.to_firestore_value());
        fields
    }
}

#[async_trait]
impl CacheStore for FirestoreCacheStore {
    async fn get_entry(&self, key: &str) -> FirestoreResult<Option<CacheEntry>> {
        let Some(doc) = self.client.get_document(CACHE_COLLECTION, key).await? else {
            return Ok(None);
        };

        // Entries missing required fields are treated as absent.
        let (Some(output_text), Some(created_at)) =
            (doc.get::<String>("outputText"), doc.get("createdAt"))
        else {
            debug!(key = %key, "Ignoring malformed cache entry");
            return Ok(None);
        };

        Ok(Some(CacheEntry {
            key: key.to_string(),
            output_text,
            provider: doc.get("provider").unwrap_or_default(),
            created_at,
        }))
    }

    async fn put_entry(&self, entry: &CacheEntry) -> FirestoreResult<()> {
        self.client
            .update_document_with_precondition(
                CACHE_COLLECTION,
                &entry.key,
                Self::to_fields(entry),
                None,
                None,
            )
            .await?;
        Ok(())
    }

    async fn delete_entry(&self, key: &str) -> FirestoreResult<()> {
        self.client.delete_document(CACHE_COLLECTION, key).await
    }
}
