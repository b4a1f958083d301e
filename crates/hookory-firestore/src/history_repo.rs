//! Generation history persistence (the `jobs` collection).

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use hookory_models::{GenerationContext, HistoryEntry, HistoryId, OutputFormat};
use tracing::{info, warn};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{json_to_value, value_to_json, Document, StructuredQuery, ToFirestoreValue, Value};

/// Collection holding saved generations.
pub const HISTORY_COLLECTION: &str = "jobs";

/// Storage for generation history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save(&self, entry: &HistoryEntry) -> FirestoreResult<()>;

    /// Up to `fetch_limit` entries owned by `user_id`, in no particular order.
    async fn list_for_user(&self, user_id: &str, fetch_limit: u32)
        -> FirestoreResult<Vec<HistoryEntry>>;

    async fn get(&self, id: &HistoryId) -> FirestoreResult<Option<HistoryEntry>>;

    async fn delete(&self, id: &HistoryId) -> FirestoreResult<()>;
}

/// Firestore-backed history store.
#[derive(Clone)]
pub struct FirestoreHistoryStore {
    client: FirestoreClient,
}

impl FirestoreHistoryStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

fn to_fields(entry: &HistoryEntry) -> FirestoreResult<HashMap<String, Value>> {
    let mut fields = HashMap::new();
    fields.insert("userId".to_string(), entry.user_id.to_firestore_value());
    fields.insert("inputText".to_string(), entry.input_text.to_firestore_value());
    fields.insert(
        "context".to_string(),
        json_to_value(&serde_json::to_value(&entry.context)?),
    );
    fields.insert(
        "formatsSelected".to_string(),
        entry
            .formats_selected
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .to_firestore_value(),
    );
    fields.insert(
        "outputs".to_string(),
        json_to_value(&serde_json::to_value(&entry.outputs)?),
    );
    fields.insert("createdAt".to_string(), entry.created_at.to_firestore_value());
    Ok(fields)
}

fn from_document(id: &str, doc: &Document) -> FirestoreResult<HistoryEntry> {
    let user_id = doc
        .get::<String>("userId")
        .ok_or_else(|| FirestoreError::invalid_response(format!("job {} has no userId", id)))?;

    let context: GenerationContext = doc
        .field("context")
        .map(|v| serde_json::from_value(value_to_json(v)))
        .transpose()?
        .unwrap_or_default();

    let formats_selected: Vec<OutputFormat> = doc
        .field("formatsSelected")
        .map(|v| serde_json::from_value(value_to_json(v)))
        .transpose()?
        .unwrap_or_default();

    let outputs: BTreeMap<OutputFormat, String> = doc
        .field("outputs")
        .map(|v| serde_json::from_value(value_to_json(v)))
        .transpose()?
        .unwrap_or_default();

    Ok(HistoryEntry {
        id: HistoryId::from_string(id),
        user_id,
        input_text: doc.get("inputText").unwrap_or_default(),
        context,
        formats_selected,
        outputs,
        created_at: doc.get("createdAt").unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl HistoryStore for FirestoreHistoryStore {
    async fn save(&self, entry: &HistoryEntry) -> FirestoreResult<()> {
        self.client
            .create_document(HISTORY_COLLECTION, entry.id.as_str(), to_fields(entry)?)
            .await?;
        info!(user_id = %entry.user_id, job_id = %entry.id, "Saved generation history");
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        fetch_limit: u32,
    ) -> FirestoreResult<Vec<HistoryEntry>> {
        // Equality filter only; ordering happens in memory so no composite index is needed.
        let query = StructuredQuery::collection(HISTORY_COLLECTION)
            .where_eq("userId", user_id.to_firestore_value())
            .limit(fetch_limit as i32);

        let docs = self
            .client
            .with_retry("list_jobs", || self.client.run_query(query.clone()))
            .await?;

        let mut entries = Vec::with_capacity(docs.len());
        for doc in &docs {
            let Some(id) = doc.doc_id() else { continue };
            match from_document(id, doc) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(job_id = %id, "Skipping unreadable history entry: {}", e),
            }
        }
        Ok(entries)
    }

    async fn get(&self, id: &HistoryId) -> FirestoreResult<Option<HistoryEntry>> {
        self.client
            .get_document(HISTORY_COLLECTION, id.as_str())
            .await?
            .map(|doc| from_document(id.as_str(), &doc))
            .transpose()
    }

    async fn delete(&self, id: &HistoryId) -> FirestoreResult<()> {
        self.client.delete_document(HISTORY_COLLECTION, id.as_str()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookory_models::{Goal, TonePreset};

    #[test]
    fn test_history_document_round_trip() {
        let mut outputs = BTreeMap::new();
        outputs.insert(OutputFormat::MainPost, "Post body".to_string());
        outputs.insert(OutputFormat::ShortViralHook, "Hook".to_string());
        let context = GenerationContext {
            target_audience: Some("founders".into()),
            goal: Some(Goal::Leads),
            tone_preset: Some(TonePreset::Bold),
            emoji_on: true,
            ..Default::default()
        };
        let entry = HistoryEntry::new(
            "uid-1",
            "Long article text",
            context,
            vec![OutputFormat::MainPost, OutputFormat::ShortViralHook],
            outputs,
            Utc::now(),
        );

        let doc = Document::new(to_fields(&entry).unwrap());
        let decoded = from_document(entry.id.as_str(), &doc).unwrap();

        assert_eq!(decoded.user_id, entry.user_id);
        assert_eq!(decoded.context, entry.context);
        assert_eq!(decoded.formats_selected, entry.formats_selected);
        assert_eq!(decoded.outputs, entry.outputs);
    }

    #[test]
    fn test_document_without_owner_is_rejected() {
        let doc = Document::new(HashMap::new());
        assert!(from_document("job-1", &doc).is_err());
    }
}
