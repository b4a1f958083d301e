//! Paid-access decisions backed by the billing provider.
//!
//! The provider is authoritative. The profile's `plan` and subscription
//! fields are a projection of it, rewritten after every authoritative check.

use std::sync::Arc;

use chrono::Utc;
use hookory_billing::{evaluate_subscriptions, BillingProvider, BillingResult};
use hookory_firestore::{FirestoreResult, ProfilePatch, ProfileStore};
use hookory_models::{PlanSettings, SubscriptionStatus, UserProfile};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::background::BackgroundTasks;

/// Profile fields derived from a subscription status.
pub fn status_patch(status: &SubscriptionStatus, plans: &PlanSettings) -> ProfilePatch {
    let plan = status.plan();
    let mut patch = ProfilePatch {
        plan: Some(plan),
        usage_limit_monthly: Some(plans.monthly_limit(plan)),
        billing_status: Some(status.has_access.then(|| status.status.clone())),
        subscription_period_start: Some(status.period_start),
        subscription_period_end: Some(status.period_end),
        ..Default::default()
    };
    if let Some(id) = &status.subscription_id {
        patch.billing_subscription_id = Some(Some(id.clone()));
    }
    patch
}

#[derive(Clone)]
pub struct EntitlementReconciler {
    provider: Arc<dyn BillingProvider>,
    store: Arc<dyn ProfileStore>,
    plans: PlanSettings,
    background: BackgroundTasks,
}

impl EntitlementReconciler {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        store: Arc<dyn ProfileStore>,
        plans: PlanSettings,
        background: BackgroundTasks,
    ) -> Self {
        Self {
            provider,
            store,
            plans,
            background,
        }
    }

    /// Ask the provider which subscription, if any, grants access.
    ///
    /// No customer id means no access, without a provider call. Provider
    /// failures are returned to the caller.
    pub async fn check_provider_status(
        &self,
        customer_id: Option<&str>,
    ) -> BillingResult<SubscriptionStatus> {
        let Some(customer_id) = customer_id else {
            return Ok(SubscriptionStatus::none());
        };

        let subscriptions = self.provider.list_subscriptions(customer_id).await?;
        let status = evaluate_subscriptions(&subscriptions, Utc::now());
        info!(
            customer_id = %customer_id,
            subscriptions = subscriptions.len(),
            has_access = status.has_access,
            subscription_id = ?status.subscription_id,
            "Checked provider subscription status"
        );
        Ok(status)
    }

    /// Write the derived plan and subscription fields to the profile.
    pub async fn sync_to_profile_store(
        &self,
        uid: &str,
        status: &SubscriptionStatus,
    ) -> FirestoreResult<()> {
        let patch = status_patch(status, &self.plans);
        self.store.update_profile(uid, &patch, None).await
    }

    /// [`Self::sync_to_profile_store`] as detached work.
    pub fn spawn_sync(&self, uid: &str, status: SubscriptionStatus) {
        let this = self.clone();
        let uid = uid.to_string();
        self.background.spawn("entitlement_sync", async move {
            this.sync_to_profile_store(&uid, &status).await
        });
    }

    /// Gate a paid feature on the authoritative check.
    ///
    /// Denies with `denial` when the provider reports no access or cannot be
    /// reached. A successful check refreshes the local projection.
    pub async fn require_paid_access(
        &self,
        profile: &UserProfile,
        denial: &str,
    ) -> ApiResult<SubscriptionStatus> {
        let status = match self
            .check_provider_status(profile.billing_customer_id.as_deref())
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(user_id = %profile.id, error = %e, "Entitlement check failed, denying access");
                metrics::record_entitlement_check("error");
                return Err(ApiError::plan_required(denial));
            }
        };

        metrics::record_entitlement_check(if status.has_access { "paid" } else { "free" });
        self.spawn_sync(&profile.id, status.clone());

        if !status.has_access {
            return Err(ApiError::plan_required(denial));
        }
        Ok(status)
    }
}
