//! Billing webhook processing.
//!
//! Every handler writes absolute derived values, never deltas, so a
//! redelivered event leaves the profile exactly as one delivery would.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hookory_billing::{
    access_grant, AccessGrant, BillingConfig, BillingError, BillingProvider, CheckoutSession,
    Event, EventKind, EventObject, Invoice, Subscription, WebhookVerifier,
};
use hookory_firestore::{run_transaction, FirestoreError, ProfilePatch, ProfileStore, TxDecision};
use hookory_models::{PlanSettings, PlanTier, UserProfile};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::metrics;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// No signing secret configured.
    #[error("Webhook configuration missing")]
    NotConfigured,

    #[error("{0}")]
    Verification(String),

    #[error("Webhook handler error: {0}")]
    Handler(String),
}

impl From<BillingError> for WebhookError {
    fn from(e: BillingError) -> Self {
        Self::Handler(e.to_string())
    }
}

impl From<FirestoreError> for WebhookError {
    fn from(e: FirestoreError) -> Self {
        Self::Handler(e.to_string())
    }
}

/// What processing an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied { user_id: String },
    Ignored(&'static str),
}

impl WebhookOutcome {
    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied { .. } => "applied",
            WebhookOutcome::Ignored(_) => "ignored",
        }
    }
}

/// Profile targeted by an event.
struct ResolvedUser {
    profile: UserProfile,
    /// Found through customer metadata and missing its customer id.
    backfill_customer: Option<String>,
}

impl ResolvedUser {
    fn with_backfill(&self, mut patch: ProfilePatch) -> ProfilePatch {
        if let Some(customer_id) = &self.backfill_customer {
            patch.billing_customer_id = Some(Some(customer_id.clone()));
        }
        patch
    }
}

pub struct WebhookEventProcessor {
    provider: Arc<dyn BillingProvider>,
    store: Arc<dyn ProfileStore>,
    plans: PlanSettings,
    billing: BillingConfig,
}

impl WebhookEventProcessor {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        store: Arc<dyn ProfileStore>,
        plans: PlanSettings,
        billing: BillingConfig,
    ) -> Self {
        Self {
            provider,
            store,
            plans,
            billing,
        }
    }

    /// Authenticate a delivery and decode its event.
    pub fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<Event, WebhookError> {
        let verifier =
            WebhookVerifier::from_config(&self.billing).map_err(|_| WebhookError::NotConfigured)?;
        let signature = signature
            .ok_or_else(|| WebhookError::Verification("missing signature header".into()))?;
        verifier
            .verify(payload, signature)
            .map_err(|e| WebhookError::Verification(e.to_string()))
    }

    /// Apply one verified event.
    pub async fn process(&self, event: &Event) -> Result<WebhookOutcome, WebhookError> {
        let result = match (event.kind(), &event.object) {
            (EventKind::CheckoutSessionCompleted, EventObject::CheckoutSession(session)) => {
                self.checkout_completed(session).await
            }
            (
                EventKind::SubscriptionCreated
                | EventKind::SubscriptionUpdated
                | EventKind::SubscriptionDeleted,
                EventObject::Subscription(sub),
            ) => self.subscription_changed(sub).await,
            (EventKind::InvoicePaymentFailed, EventObject::Invoice(invoice)) => {
                self.payment_failed(invoice).await
            }
            (EventKind::InvoicePaid, EventObject::Invoice(invoice)) => {
                self.invoice_paid(invoice).await
            }
            (EventKind::Other, _) => Ok(WebhookOutcome::Ignored("unhandled event type")),
            (kind, object) => Err(WebhookError::Handler(format!(
                "{:?} event carries an unexpected object: {:?}",
                kind, object
            ))),
        };

        match &result {
            Ok(outcome) => {
                metrics::record_webhook_event(&event.event_type, outcome.label());
                info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    outcome = ?outcome,
                    "Processed billing webhook"
                );
            }
            Err(e) => {
                metrics::record_webhook_event(&event.event_type, "error");
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    subscription_id = event.subscription_id().unwrap_or("-"),
                    customer_id = event.customer_id().unwrap_or("-"),
                    error = %e,
                    "Billing webhook handler failed"
                );
            }
        }
        result
    }

    /// Find the profile for a billing customer.
    ///
    /// Falls back to the user id stored in the customer's metadata when no
    /// profile carries the customer id yet.
    async fn resolve_user(&self, customer_id: &str) -> Result<Option<ResolvedUser>, WebhookError> {
        if let Some(profile) = self.store.find_by_billing_customer(customer_id).await? {
            return Ok(Some(ResolvedUser {
                profile,
                backfill_customer: None,
            }));
        }

        warn!(customer_id = %customer_id, "No profile for billing customer, checking customer metadata");
        let customer = match self.provider.get_customer(customer_id).await {
            Ok(customer) => customer,
            Err(e) if e.is_not_found() => {
                warn!(customer_id = %customer_id, "Billing customer not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(uid) = customer.user_id() else {
            warn!(customer_id = %customer_id, "Billing customer has no user id metadata");
            return Ok(None);
        };

        let Some(found) = self.store.get_profile(uid).await? else {
            warn!(customer_id = %customer_id, user_id = %uid, "Metadata user id has no profile");
            return Ok(None);
        };
        info!(customer_id = %customer_id, user_id = %uid, "Resolved user through customer metadata");

        let backfill_customer = found
            .value
            .billing_customer_id
            .is_none()
            .then(|| customer_id.to_string());
        Ok(Some(ResolvedUser {
            profile: found.value,
            backfill_customer,
        }))
    }

    async fn apply(&self, user: &ResolvedUser, patch: ProfilePatch) -> Result<WebhookOutcome, WebhookError> {
        let patch = user.with_backfill(patch);
        self.store.update_profile(&user.profile.id, &patch, None).await?;
        Ok(WebhookOutcome::Applied {
            user_id: user.profile.id.clone(),
        })
    }

    fn plan_patch(&self, plan: PlanTier) -> ProfilePatch {
        ProfilePatch {
            plan: Some(plan),
            usage_limit_monthly: Some(self.plans.monthly_limit(plan)),
            ..Default::default()
        }
    }

    async fn checkout_completed(&self, session: &CheckoutSession) -> Result<WebhookOutcome, WebhookError> {
        let (Some(customer_id), Some(subscription_id)) = (&session.customer, &session.subscription)
        else {
            debug!(session_id = %session.id, "Checkout session without customer or subscription");
            return Ok(WebhookOutcome::Ignored("checkout without subscription"));
        };

        let (period_start, period_end) = match self.provider.get_subscription(subscription_id).await {
            Ok(sub) => (sub.period_start(), sub.period_end()),
            Err(e) => {
                warn!(subscription_id = %subscription_id, error = %e, "Could not fetch subscription periods");
                (None, None)
            }
        };

        let Some(user) = self.resolve_user(customer_id).await? else {
            return Ok(WebhookOutcome::Ignored("user not resolved"));
        };

        let patch = ProfilePatch {
            billing_subscription_id: Some(Some(subscription_id.clone())),
            billing_status: Some(Some("active".to_string())),
            subscription_period_start: Some(period_start),
            subscription_period_end: Some(period_end),
            ..self.plan_patch(PlanTier::Creator)
        };
        self.apply(&user, patch).await
    }

    async fn subscription_changed(&self, sub: &Subscription) -> Result<WebhookOutcome, WebhookError> {
        let Some(customer_id) = &sub.customer else {
            return Ok(WebhookOutcome::Ignored("subscription without customer"));
        };
        let Some(user) = self.resolve_user(customer_id).await? else {
            return Ok(WebhookOutcome::Ignored("user not resolved"));
        };

        let active = access_grant(sub, Utc::now()) != AccessGrant::None;
        debug!(
            subscription_id = %sub.id,
            user_id = %user.profile.id,
            status = sub.status.as_str(),
            active,
            "Applying subscription state"
        );

        let patch = ProfilePatch {
            billing_subscription_id: Some(Some(sub.id.clone())),
            billing_status: Some(Some(sub.status.as_str().to_string())),
            subscription_period_start: Some(sub.period_start()),
            subscription_period_end: Some(sub.period_end()),
            ..self.plan_patch(PlanTier::from_access(active))
        };
        self.apply(&user, patch).await
    }

    async fn payment_failed(&self, invoice: &Invoice) -> Result<WebhookOutcome, WebhookError> {
        let Some(customer_id) = &invoice.customer else {
            return Ok(WebhookOutcome::Ignored("invoice without customer"));
        };
        let Some(user) = self.resolve_user(customer_id).await? else {
            return Ok(WebhookOutcome::Ignored("user not resolved"));
        };

        let plans = self.plans.clone();
        let backfill = user.backfill_customer.clone();
        run_transaction(self.store.as_ref(), &user.profile.id, |profile| {
            let profile = profile
                .ok_or_else(|| FirestoreError::not_found(format!("users/{}", user.profile.id)))?;
            let mut patch = ProfilePatch {
                billing_status: Some(Some("past_due".to_string())),
                ..Default::default()
            };
            if payment_grace_over(profile.subscription_period_end, Utc::now()) {
                patch.plan = Some(PlanTier::Free);
                patch.usage_limit_monthly = Some(plans.monthly_limit(PlanTier::Free));
            }
            if let Some(customer_id) = &backfill {
                patch.billing_customer_id = Some(Some(customer_id.clone()));
            }
            Ok(TxDecision::Write(patch, ()))
        })
        .await?;

        Ok(WebhookOutcome::Applied {
            user_id: user.profile.id,
        })
    }

    async fn invoice_paid(&self, invoice: &Invoice) -> Result<WebhookOutcome, WebhookError> {
        let Some(subscription_id) = invoice.subscription_id() else {
            return Ok(WebhookOutcome::Ignored("invoice without subscription"));
        };
        let sub = self.provider.get_subscription(subscription_id).await?;
        self.subscription_changed(&sub).await
    }
}

/// A failed payment downgrades only once the paid period is over.
fn payment_grace_over(period_end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    period_end.map_or(true, |end| end <= now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hookory_billing::fake::FakeBillingProvider;
    use hookory_billing::{sign_payload, SubscriptionState};
    use hookory_firestore::memory::MemoryProfileStore;
    use serde_json::json;

    struct Harness {
        provider: Arc<FakeBillingProvider>,
        store: Arc<MemoryProfileStore>,
        processor: WebhookEventProcessor,
    }

    fn harness() -> Harness {
        let provider = Arc::new(FakeBillingProvider::new());
        let store = Arc::new(MemoryProfileStore::new());
        let processor = WebhookEventProcessor::new(
            provider.clone(),
            store.clone(),
            PlanSettings::default(),
            BillingConfig {
                webhook_secret: Some("whsec_test".into()),
                ..Default::default()
            },
        );
        Harness {
            provider,
            store,
            processor,
        }
    }

    fn linked_profile(uid: &str, customer: Option<&str>) -> UserProfile {
        let mut p = UserProfile::new(uid, &PlanSettings::default(), Utc::now());
        p.billing_customer_id = customer.map(str::to_string);
        p
    }

    fn event(event_type: &str, object: serde_json::Value) -> Event {
        let payload = json!({
            "id": "evt_1",
            "type": event_type,
            "created": Utc::now().timestamp(),
            "data": {"object": object}
        });
        Event::from_payload(&payload.to_string()).unwrap()
    }

    fn subscription_json(status: &str, end: DateTime<Utc>) -> serde_json::Value {
        json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": status,
            "current_period_start": (end - Duration::days(30)).timestamp(),
            "current_period_end": end.timestamp(),
        })
    }

    #[test]
    fn test_verify_requires_signature_and_secret() {
        let h = harness();
        let payload = br#"{"id":"evt_1","type":"ping","data":{"object":{}}}"#;

        assert!(matches!(
            h.processor.verify(payload, None),
            Err(WebhookError::Verification(_))
        ));
        let header = sign_payload("whsec_test", payload, Utc::now().timestamp());
        assert!(h.processor.verify(payload, Some(&header)).is_ok());
        let forged = sign_payload("whsec_other", payload, Utc::now().timestamp());
        assert!(h.processor.verify(payload, Some(&forged)).is_err());

        let unconfigured = WebhookEventProcessor::new(
            h.provider.clone(),
            h.store.clone(),
            PlanSettings::default(),
            BillingConfig::default(),
        );
        assert!(matches!(
            unconfigured.verify(payload, Some(&header)),
            Err(WebhookError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_subscription_update_is_idempotent() {
        let h = harness();
        h.store.insert(linked_profile("u1", Some("cus_1")));
        let ev = event(
            "customer.subscription.updated",
            subscription_json("active", Utc::now() + Duration::days(20)),
        );

        h.processor.process(&ev).await.unwrap();
        let once = h.store.snapshot("u1").unwrap();
        h.processor.process(&ev).await.unwrap();
        let twice = h.store.snapshot("u1").unwrap();

        assert_eq!(once.plan, PlanTier::Creator);
        assert_eq!(once.usage_limit_monthly, 100);
        assert_eq!(once.billing_status.as_deref(), Some("active"));
        let strip = |mut p: UserProfile| {
            p.updated_at = p.created_at;
            p
        };
        assert_eq!(strip(once), strip(twice));
    }

    #[tokio::test]
    async fn test_deleted_subscription_via_metadata_fallback() {
        let h = harness();
        h.store.insert(linked_profile("u1", None));
        h.provider.add_customer("cus_1", Some("u1"));
        let ev = event(
            "customer.subscription.deleted",
            subscription_json("canceled", Utc::now() - Duration::days(1)),
        );

        let outcome = h.processor.process(&ev).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Applied { user_id: "u1".into() });
        let p = h.store.snapshot("u1").unwrap();
        assert_eq!(p.plan, PlanTier::Free);
        assert_eq!(p.billing_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(p.billing_status.as_deref(), Some("canceled"));
    }

    #[tokio::test]
    async fn test_unknown_customer_is_acknowledged() {
        let h = harness();
        let ev = event(
            "customer.subscription.updated",
            subscription_json("active", Utc::now() + Duration::days(20)),
        );
        assert_eq!(
            h.processor.process(&ev).await.unwrap(),
            WebhookOutcome::Ignored("user not resolved")
        );
    }

    #[tokio::test]
    async fn test_checkout_forces_creator_with_periods() {
        let h = harness();
        h.store.insert(linked_profile("u1", Some("cus_1")));
        let end = Utc::now() + Duration::days(30);
        h.provider.add_subscription(
            Subscription::new("sub_1", "cus_1", SubscriptionState::Active)
                .with_period(Utc::now(), end),
        );
        let ev = event(
            "checkout.session.completed",
            json!({"id": "cs_1", "customer": "cus_1", "subscription": "sub_1"}),
        );

        h.processor.process(&ev).await.unwrap();
        let p = h.store.snapshot("u1").unwrap();
        assert_eq!(p.plan, PlanTier::Creator);
        assert_eq!(p.billing_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(p.subscription_period_end.map(|t| t.timestamp()), Some(end.timestamp()));
    }

    #[tokio::test]
    async fn test_checkout_without_subscription_is_ignored() {
        let h = harness();
        let ev = event("checkout.session.completed", json!({"id": "cs_1", "customer": "cus_1"}));
        assert!(matches!(
            h.processor.process(&ev).await.unwrap(),
            WebhookOutcome::Ignored(_)
        ));
    }

    #[tokio::test]
    async fn test_payment_failed_keeps_plan_during_grace() {
        let h = harness();
        let mut p = linked_profile("u1", Some("cus_1"));
        p.plan = PlanTier::Creator;
        p.usage_limit_monthly = 100;
        p.subscription_period_end = Some(Utc::now() + Duration::days(3));
        h.store.insert(p);

        let ev = event("invoice.payment_failed", json!({"id": "in_1", "customer": "cus_1"}));
        h.processor.process(&ev).await.unwrap();
        let p = h.store.snapshot("u1").unwrap();
        assert_eq!(p.billing_status.as_deref(), Some("past_due"));
        assert_eq!(p.plan, PlanTier::Creator);
    }

    #[tokio::test]
    async fn test_payment_failed_after_period_downgrades() {
        let h = harness();
        let mut p = linked_profile("u1", Some("cus_1"));
        p.plan = PlanTier::Creator;
        p.usage_limit_monthly = 100;
        p.subscription_period_end = Some(Utc::now() - Duration::days(1));
        h.store.insert(p);

        let ev = event("invoice.payment_failed", json!({"id": "in_1", "customer": "cus_1"}));
        h.processor.process(&ev).await.unwrap();
        let p = h.store.snapshot("u1").unwrap();
        assert_eq!(p.plan, PlanTier::Free);
        assert_eq!(p.usage_limit_monthly, 5);
    }

    #[tokio::test]
    async fn test_invoice_paid_refetches_subscription() {
        let h = harness();
        h.store.insert(linked_profile("u1", Some("cus_1")));
        h.provider.add_subscription(
            Subscription::new("sub_1", "cus_1", SubscriptionState::Active)
                .with_period(Utc::now(), Utc::now() + Duration::days(30)),
        );
        let ev = event(
            "invoice.paid",
            json!({"id": "in_1", "customer": "cus_1", "subscription": "sub_1"}),
        );
        h.processor.process(&ev).await.unwrap();
        assert_eq!(h.store.snapshot("u1").unwrap().plan, PlanTier::Creator);
    }

    #[tokio::test]
    async fn test_provider_outage_is_an_error() {
        let h = harness();
        h.provider.set_failing(true);
        let ev = event(
            "invoice.paid",
            json!({"id": "in_1", "customer": "cus_1", "subscription": "sub_1"}),
        );
        assert!(matches!(
            h.processor.process(&ev).await,
            Err(WebhookError::Handler(_))
        ));
        assert_eq!(ev.subscription_id(), Some("sub_1"));
        assert_eq!(ev.customer_id(), Some("cus_1"));
    }

    #[tokio::test]
    async fn test_mismatched_object_is_an_error() {
        let h = harness();
        let ev = Event {
            id: "evt_9".into(),
            event_type: "invoice.paid".into(),
            created: Utc::now().timestamp(),
            object: EventObject::Other,
        };
        assert!(matches!(
            h.processor.process(&ev).await,
            Err(WebhookError::Handler(_))
        ));
    }

    #[tokio::test]
    async fn test_other_events_are_ignored() {
        let h = harness();
        let ev = event("customer.created", json!({"id": "cus_9"}));
        assert_eq!(
            h.processor.process(&ev).await.unwrap(),
            WebhookOutcome::Ignored("unhandled event type")
        );
    }
}
