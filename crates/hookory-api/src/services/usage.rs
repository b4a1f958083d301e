//! Per-user monthly quota and generation cooldown.
//!
//! Both mutating operations run inside [`run_transaction`] and apply the
//! same [`recompute_boundary`] rule, so a request that straddles a reset is
//! counted against the period it actually lands in.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hookory_firestore::{run_transaction, FirestoreError, ProfilePatch, ProfileStore, TxDecision};
use hookory_models::{
    cooldown_status, due_notifications, recompute_boundary, CooldownStatus, NotificationFlags,
    PlanSettings, UsageNotification, UserProfile,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::background::BackgroundTasks;
use crate::services::email::{usage_notification_email, EmailSender};

/// Usage counters after the boundary rule has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub usage_count: u32,
    pub usage_limit_monthly: u32,
    pub usage_reset_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn is_exhausted(&self) -> bool {
        self.usage_count >= self.usage_limit_monthly
    }
}

/// Result of a committed increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementOutcome {
    pub usage: UsageSnapshot,
    /// The increment landed in a new period.
    pub period_reset: bool,
    /// Notifications claimed by this increment.
    pub notifications: Vec<UsageNotification>,
}

fn profile_missing(uid: &str) -> FirestoreError {
    FirestoreError::not_found(format!("users/{}", uid))
}

/// Sends usage notification emails as detached work.
#[derive(Clone)]
pub struct UsageNotifier {
    sender: Arc<dyn EmailSender>,
    background: BackgroundTasks,
    app_url: String,
}

impl UsageNotifier {
    pub fn new(sender: Arc<dyn EmailSender>, background: BackgroundTasks, app_url: String) -> Self {
        Self {
            sender,
            background,
            app_url,
        }
    }

    fn dispatch(&self, profile: &UserProfile, usage_limit: u32, kinds: &[UsageNotification]) {
        let Some(email) = profile.email.clone() else {
            debug!(user_id = %profile.id, "No email on profile, skipping usage notification");
            return;
        };

        for &kind in kinds {
            let message = usage_notification_email(
                kind,
                &email,
                profile.greeting_name(),
                usage_limit,
                &self.app_url,
            );
            let sender = Arc::clone(&self.sender);
            let user_id = profile.id.clone();
            self.background.spawn("usage_notification", async move {
                let result = sender.send(&message).await;
                metrics::record_notification(
                    kind.as_str(),
                    if result.is_ok() { "sent" } else { "failed" },
                );
                if result.is_ok() {
                    info!(user_id = %user_id, kind = kind.as_str(), "Usage notification sent");
                }
                result
            });
        }
    }
}

/// Quota and cooldown enforcement over the profile store.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn ProfileStore>,
    plans: PlanSettings,
    notifier: UsageNotifier,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn ProfileStore>, plans: PlanSettings, notifier: UsageNotifier) -> Self {
        Self {
            store,
            plans,
            notifier,
        }
    }

    /// Apply the boundary rule and persist any reset or correction.
    pub async fn check_and_reset_usage(&self, uid: &str) -> ApiResult<UsageSnapshot> {
        let snapshot = run_transaction(self.store.as_ref(), uid, |profile| {
            let profile = profile.ok_or_else(|| profile_missing(uid))?;
            let boundary = recompute_boundary(profile, Utc::now());
            let snapshot = UsageSnapshot {
                usage_count: boundary.usage_count,
                usage_limit_monthly: profile.usage_limit_monthly,
                usage_reset_at: boundary.reset_at,
            };

            if !boundary.needs_write() {
                return Ok(TxDecision::Skip(snapshot));
            }

            let mut patch = ProfilePatch {
                usage_reset_at: Some(boundary.reset_at),
                ..Default::default()
            };
            if boundary.crossed {
                patch.usage_count = Some(0);
                patch.usage_warning_email_sent = Some(false);
                patch.usage_limit_email_sent = Some(false);
            }
            Ok(TxDecision::Write(patch, snapshot))
        })
        .await?;

        Ok(snapshot)
    }

    /// Cooldown state for the user's current plan. Read-only.
    pub async fn check_cooldown(&self, uid: &str) -> ApiResult<CooldownStatus> {
        let Some(profile) = self.store.get_profile(uid).await? else {
            return Ok(CooldownStatus::allowed());
        };
        Ok(self.cooldown_for(&profile.value, Utc::now()))
    }

    /// Cooldown state for an already loaded profile.
    pub fn cooldown_for(&self, profile: &UserProfile, now: DateTime<Utc>) -> CooldownStatus {
        let plan = profile.effective_plan(now);
        cooldown_status(profile.last_generate_at, self.plans.cooldown_secs(plan), now)
    }

    /// Add `amount` generations and stamp `lastGenerateAt`.
    ///
    /// Notification flags are claimed inside the same transaction; the emails
    /// go out only after it commits, and their failure never surfaces here.
    pub async fn increment(&self, uid: &str, amount: u32) -> ApiResult<IncrementOutcome> {
        let (outcome, profile) = run_transaction(self.store.as_ref(), uid, |profile| {
            let profile = profile.ok_or_else(|| profile_missing(uid))?;
            let now = Utc::now();
            let boundary = recompute_boundary(profile, now);
            let usage_count = boundary.usage_count.saturating_add(amount);

            let flags = if boundary.crossed {
                NotificationFlags::default()
            } else {
                NotificationFlags::from_profile(profile)
            };
            let due = due_notifications(usage_count, profile.usage_limit_monthly, flags);
            let flags = flags.with_sent(&due);

            let patch = ProfilePatch {
                usage_count: Some(usage_count),
                usage_reset_at: Some(boundary.reset_at),
                last_generate_at: Some(now),
                usage_warning_email_sent: Some(flags.warning_sent),
                usage_limit_email_sent: Some(flags.limit_sent),
                ..Default::default()
            };
            let outcome = IncrementOutcome {
                usage: UsageSnapshot {
                    usage_count,
                    usage_limit_monthly: profile.usage_limit_monthly,
                    usage_reset_at: boundary.reset_at,
                },
                period_reset: boundary.crossed,
                notifications: due,
            };
            Ok(TxDecision::Write(patch, (outcome, profile.clone())))
        })
        .await?;

        metrics::record_usage_increment(profile.plan.as_str(), outcome.period_reset);
        debug!(
            user_id = %uid,
            usage_count = outcome.usage.usage_count,
            limit = outcome.usage.usage_limit_monthly,
            "Usage incremented"
        );

        if !outcome.notifications.is_empty() {
            self.notifier.dispatch(
                &profile,
                outcome.usage.usage_limit_monthly,
                &outcome.notifications,
            );
        }
        Ok(outcome)
    }

    /// Reject the request if the quota is used up.
    pub fn ensure_quota(&self, usage: &UsageSnapshot) -> ApiResult<()> {
        if usage.is_exhausted() {
            metrics::record_usage_rejection("quota");
            return Err(ApiError::QuotaExceeded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::email::{EmailError, EmailMessage};
    use chrono::{Duration, TimeZone};
    use hookory_firestore::memory::MemoryProfileStore;
    use hookory_models::PlanTier;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<EmailMessage>>);

    #[async_trait::async_trait]
    impl EmailSender for Outbox {
        async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
            self.0.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryProfileStore>,
        outbox: Arc<Outbox>,
        background: BackgroundTasks,
        ledger: UsageLedger,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryProfileStore::new());
        let outbox = Arc::new(Outbox::default());
        let background = BackgroundTasks::default();
        let notifier = UsageNotifier::new(
            outbox.clone(),
            background.clone(),
            "https://app.test".into(),
        );
        let ledger = UsageLedger::new(store.clone(), PlanSettings::default(), notifier);
        Harness {
            store,
            outbox,
            background,
            ledger,
        }
    }

    fn profile(uid: &str) -> UserProfile {
        UserProfile::new(uid, &PlanSettings::default(), Utc::now())
            .with_email(Some(format!("{}@example.com", uid)))
    }

    #[tokio::test]
    async fn test_reset_after_boundary_is_idempotent() {
        let h = harness();
        let mut p = profile("u1");
        p.usage_count = 4;
        p.usage_warning_email_sent = true;
        p.usage_reset_at = Some(Utc::now() - Duration::days(1));
        h.store.insert(p);

        for _ in 0..3 {
            let snap = h.ledger.check_and_reset_usage("u1").await.unwrap();
            assert_eq!(snap.usage_count, 0);
            assert!(snap.usage_reset_at > Utc::now());
        }
        let stored = h.store.snapshot("u1").unwrap();
        assert_eq!(stored.usage_count, 0);
        assert!(!stored.usage_warning_email_sent);
        assert_eq!(h.store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_creator_boundary_follows_period_end() {
        let h = harness();
        let period_end = Utc::now() + Duration::days(9);
        let mut p = profile("u1");
        p.plan = PlanTier::Creator;
        p.usage_count = 12;
        p.subscription_period_end = Some(period_end);
        h.store.insert(p);

        let snap = h.ledger.check_and_reset_usage("u1").await.unwrap();
        assert_eq!(snap.usage_count, 12);
        assert_eq!(snap.usage_reset_at, period_end);
        assert_eq!(h.store.snapshot("u1").unwrap().usage_reset_at, Some(period_end));
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        let h = harness();
        let err = h.ledger.check_and_reset_usage("ghost").await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
        assert!(h.ledger.increment("ghost", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_cooldown_arithmetic() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let mut p = profile("u1");
        p.last_generate_at = Some(now - Duration::seconds(10));
        let status = h.ledger.cooldown_for(&p, now);
        assert!(!status.allowed);
        assert_eq!(status.seconds_remaining, 35);

        p.last_generate_at = Some(now - Duration::seconds(50));
        assert_eq!(h.ledger.cooldown_for(&p, now), CooldownStatus::allowed());
    }

    #[tokio::test]
    async fn test_cooldown_for_unknown_user_is_allowed() {
        let h = harness();
        assert!(h.ledger.check_cooldown("nobody").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let h = harness();
        let mut p = profile("u1");
        p.usage_limit_monthly = 1000;
        h.store.insert(p);

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let ledger = h.ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.increment("u1", i + 1).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(h.store.snapshot("u1").unwrap().usage_count, 1 + 2 + 3 + 4);
    }

    #[tokio::test]
    async fn test_increment_across_boundary_restarts_count() {
        let h = harness();
        let mut p = profile("u1");
        p.usage_count = 5;
        p.usage_limit_email_sent = true;
        p.usage_reset_at = Some(Utc::now() - Duration::seconds(1));
        h.store.insert(p);

        let outcome = h.ledger.increment("u1", 2).await.unwrap();
        assert!(outcome.period_reset);
        assert_eq!(outcome.usage.usage_count, 2);
        let stored = h.store.snapshot("u1").unwrap();
        assert_eq!(stored.usage_count, 2);
        assert!(!stored.usage_limit_email_sent);
        assert!(stored.last_generate_at.is_some());
    }

    #[tokio::test]
    async fn test_warning_fires_once_per_period() {
        let h = harness();
        let mut p = profile("u1");
        p.usage_limit_monthly = 100;
        p.usage_count = 79;
        h.store.insert(p);

        let first = h.ledger.increment("u1", 1).await.unwrap();
        assert_eq!(first.notifications, vec![UsageNotification::Warning]);
        let second = h.ledger.increment("u1", 1).await.unwrap();
        assert!(second.notifications.is_empty());
        h.background.wait_idle().await;
        assert_eq!(h.outbox.0.lock().unwrap().len(), 1);

        // Next period clears the flag.
        let mut p = h.store.snapshot("u1").unwrap();
        p.usage_reset_at = Some(Utc::now() - Duration::seconds(1));
        p.usage_count = 79;
        h.store.insert(p);
        h.ledger.check_and_reset_usage("u1").await.unwrap();
        let mut p = h.store.snapshot("u1").unwrap();
        p.usage_count = 79;
        h.store.insert(p);

        let third = h.ledger.increment("u1", 1).await.unwrap();
        assert_eq!(third.notifications, vec![UsageNotification::Warning]);
    }

    #[tokio::test]
    async fn test_email_failure_keeps_usage() {
        struct Broken;

        #[async_trait::async_trait]
        impl EmailSender for Broken {
            async fn send(&self, _: &EmailMessage) -> Result<(), EmailError> {
                Err(EmailError::NotConfigured)
            }
        }

        let store = Arc::new(MemoryProfileStore::new());
        let background = BackgroundTasks::default();
        let notifier = UsageNotifier::new(Arc::new(Broken), background.clone(), "x".into());
        let ledger = UsageLedger::new(store.clone(), PlanSettings::default(), notifier);
        let mut p = profile("u1");
        p.usage_count = 4;
        store.insert(p);

        let outcome = ledger.increment("u1", 1).await.unwrap();
        assert_eq!(outcome.notifications, vec![UsageNotification::LimitReached]);
        background.wait_idle().await;
        let stored = store.snapshot("u1").unwrap();
        assert_eq!(stored.usage_count, 5);
        assert!(stored.usage_limit_email_sent);
    }

    #[test]
    fn test_ensure_quota() {
        let h = harness();
        let usage = UsageSnapshot {
            usage_count: 5,
            usage_limit_monthly: 5,
            usage_reset_at: Utc::now(),
        };
        assert!(matches!(
            h.ledger.ensure_quota(&usage),
            Err(ApiError::QuotaExceeded)
        ));
    }
}
