//! Reconciled subscription state as reported by the billing provider.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::PlanTier;

/// Outcome of checking a customer's subscriptions with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub has_access: bool,
    /// Provider status string of the chosen subscription (`"none"` if there is none).
    pub status: String,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub subscription_id: Option<String>,
}

impl SubscriptionStatus {
    /// No subscription on record.
    pub fn none() -> Self {
        Self {
            has_access: false,
            status: "none".to_string(),
            period_start: None,
            period_end: None,
            subscription_id: None,
        }
    }

    pub fn plan(&self) -> PlanTier {
        PlanTier::from_access(self.has_access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_free() {
        let status = SubscriptionStatus::none();
        assert!(!status.has_access);
        assert_eq!(status.status, "none");
        assert_eq!(status.plan(), PlanTier::Free);
    }
}
