//! User profile record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::plan::{PlanSettings, PlanTier};
use crate::usage::next_month_start;

/// One profile per identity. Mutated by the usage ledger, the entitlement
/// reconciler and the billing webhook processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Identity-provider subject id.
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub plan: PlanTier,
    #[serde(default)]
    pub usage_count: u32,
    pub usage_limit_monthly: u32,
    /// Next boundary at which `usage_count` resets. Legacy documents may lack it.
    pub usage_reset_at: Option<DateTime<Utc>>,
    pub last_generate_at: Option<DateTime<Utc>>,
    pub billing_customer_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    /// Mirrors the provider's subscription status string.
    pub billing_status: Option<String>,
    pub subscription_period_start: Option<DateTime<Utc>>,
    pub subscription_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_warning_email_sent: bool,
    #[serde(default)]
    pub usage_limit_email_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Fresh free-plan profile for a first-time user.
    pub fn new(id: impl Into<String>, settings: &PlanSettings, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
            email_verified: false,
            plan: PlanTier::Free,
            usage_count: 0,
            usage_limit_monthly: settings.monthly_limit(PlanTier::Free),
            usage_reset_at: Some(next_month_start(now)),
            last_generate_at: None,
            billing_customer_id: None,
            billing_subscription_id: None,
            billing_status: None,
            subscription_period_start: None,
            subscription_period_end: None,
            usage_warning_email_sent: false,
            usage_limit_email_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.display_name = display_name;
        self
    }

    pub fn with_email_verified(mut self, verified: bool) -> Self {
        self.email_verified = verified;
        self
    }

    /// Fast-path paid check from the locally cached projection.
    ///
    /// A creator plan whose mirrored period end has passed is treated as free
    /// until the next reconciliation corrects the stored plan.
    pub fn has_cached_paid_access(&self, now: DateTime<Utc>) -> bool {
        let expired = self
            .subscription_period_end
            .map(|end| end <= now)
            .unwrap_or(false);
        self.plan == PlanTier::Creator && !expired
    }

    /// Effective plan for display, derived from [`Self::has_cached_paid_access`].
    pub fn effective_plan(&self, now: DateTime<Utc>) -> PlanTier {
        PlanTier::from_access(self.has_cached_paid_access(now))
    }

    /// Name used to greet the user in notification emails.
    pub fn greeting_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Creator")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_new_profile_defaults() {
        let profile = UserProfile::new("uid-1", &PlanSettings::default(), now());
        assert_eq!(profile.plan, PlanTier::Free);
        assert_eq!(profile.usage_limit_monthly, 5);
        assert_eq!(profile.usage_count, 0);
        assert_eq!(
            profile.usage_reset_at,
            Some(Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_cached_paid_access_respects_period_end() {
        let mut profile = UserProfile::new("uid-1", &PlanSettings::default(), now());
        profile.plan = PlanTier::Creator;
        assert!(profile.has_cached_paid_access(now()));

        profile.subscription_period_end = Some(now() + Duration::days(3));
        assert!(profile.has_cached_paid_access(now()));

        profile.subscription_period_end = Some(now() - Duration::seconds(1));
        assert!(!profile.has_cached_paid_access(now()));
        assert_eq!(profile.effective_plan(now()), PlanTier::Free);
    }

    #[test]
    fn test_greeting_name_fallback() {
        let profile = UserProfile::new("uid-1", &PlanSettings::default(), now());
        assert_eq!(profile.greeting_name(), "Creator");
        let named = profile.with_display_name(Some("Ada".into()));
        assert_eq!(named.greeting_name(), "Ada");
    }
}
