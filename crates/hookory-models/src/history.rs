//! Saved generation history for paid users.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::generation::{GenerationContext, OutputFormat};

/// Unique identifier for a history entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct HistoryId(pub String);

impl HistoryId {
    /// Generate a new random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for HistoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One saved generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub user_id: String,
    pub input_text: String,
    pub context: GenerationContext,
    pub formats_selected: Vec<OutputFormat>,
    /// Generated text keyed by format.
    pub outputs: BTreeMap<OutputFormat, String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        user_id: impl Into<String>,
        input_text: impl Into<String>,
        context: GenerationContext,
        formats_selected: Vec<OutputFormat>,
        outputs: BTreeMap<OutputFormat, String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoryId::new(),
            user_id: user_id.into(),
            input_text: input_text.into(),
            context,
            formats_selected,
            outputs,
            created_at,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn summary(&self) -> HistorySummary {
        HistorySummary {
            id: self.id.clone(),
            created_at: self.created_at,
            formats_selected: self.formats_selected.clone(),
        }
    }
}

/// Listing row returned by the history index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub id: HistoryId,
    pub created_at: DateTime<Utc>,
    pub formats_selected: Vec<OutputFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_serialize_by_format_name() {
        let mut outputs = BTreeMap::new();
        outputs.insert(OutputFormat::Carousel, "slides".to_string());
        let entry = HistoryEntry::new(
            "uid",
            "input",
            GenerationContext::default(),
            vec![OutputFormat::Carousel],
            outputs,
            Utc::now(),
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["outputs"]["carousel"], "slides");
        assert!(entry.is_owned_by("uid"));
        assert!(!entry.is_owned_by("other"));
    }
}
