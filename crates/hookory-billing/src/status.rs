//! Paid-access decision over a customer's subscriptions.

use chrono::{DateTime, Utc};
use hookory_models::SubscriptionStatus;

use crate::types::{Subscription, SubscriptionState};

/// How strongly a subscription grants access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessGrant {
    None,
    /// Canceled, but the paid period has not ended yet.
    Grace,
    /// Active, trialing or past due.
    Live,
}

/// Access granted by a single subscription at `now`.
pub fn access_grant(sub: &Subscription, now: DateTime<Utc>) -> AccessGrant {
    if sub.status.is_live() {
        return AccessGrant::Live;
    }
    if sub.status != SubscriptionState::Canceled {
        return AccessGrant::None;
    }

    if sub.ended_at.is_some_and(|t| t <= now) {
        return AccessGrant::None;
    }
    // Canceled immediately rather than at period end.
    if sub.canceled_at.is_some_and(|t| t <= now) && !sub.cancel_at_period_end {
        return AccessGrant::None;
    }
    match sub.period_end() {
        Some(end) if end > now => AccessGrant::Grace,
        _ => AccessGrant::None,
    }
}

/// Pick the subscription that decides access.
///
/// The most permissive grant wins; among equal grants the later period end
/// wins. Returns [`SubscriptionStatus::none`] when nothing grants access.
pub fn evaluate_subscriptions(subs: &[Subscription], now: DateTime<Utc>) -> SubscriptionStatus {
    // Reversed so that ties keep the provider's first listing.
    let best = subs
        .iter()
        .rev()
        .map(|s| (access_grant(s, now), s))
        .filter(|(grant, _)| *grant != AccessGrant::None)
        .max_by_key(|(grant, s)| (*grant, s.period_end()));

    match best {
        Some((_, sub)) => SubscriptionStatus {
            has_access: true,
            status: sub.status.as_str().to_string(),
            period_start: sub.period_start(),
            period_end: sub.period_end(),
            subscription_id: Some(sub.id.clone()),
        },
        None => SubscriptionStatus::none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap()
    }

    fn sub(id: &str, status: SubscriptionState, end_offset_days: i64) -> Subscription {
        Subscription::new(id, "cus_1", status).with_period(
            now() - Duration::days(20),
            now() + Duration::days(end_offset_days),
        )
    }

    #[test]
    fn test_live_statuses_grant_access_even_after_period_end() {
        for status in [
            SubscriptionState::Active,
            SubscriptionState::Trialing,
            SubscriptionState::PastDue,
        ] {
            assert_eq!(access_grant(&sub("s", status, -1), now()), AccessGrant::Live);
        }
    }

    #[test]
    fn test_canceled_at_period_end_keeps_grace() {
        let s = sub("s", SubscriptionState::Canceled, 5).with_cancellation(
            Some(now() - Duration::days(1)),
            true,
            None,
        );
        assert_eq!(access_grant(&s, now()), AccessGrant::Grace);
    }

    #[test]
    fn test_canceled_and_ended_has_no_access() {
        let ended = sub("s", SubscriptionState::Canceled, 5).with_cancellation(
            None,
            true,
            Some(now() - Duration::seconds(1)),
        );
        assert_eq!(access_grant(&ended, now()), AccessGrant::None);

        let immediate = sub("s", SubscriptionState::Canceled, 5).with_cancellation(
            Some(now() - Duration::hours(1)),
            false,
            None,
        );
        assert_eq!(access_grant(&immediate, now()), AccessGrant::None);

        let lapsed = sub("s", SubscriptionState::Canceled, 0);
        assert_eq!(access_grant(&lapsed, now()), AccessGrant::None);
    }

    #[test]
    fn test_other_statuses_have_no_access() {
        for status in [
            SubscriptionState::Unpaid,
            SubscriptionState::Incomplete,
            SubscriptionState::IncompleteExpired,
            SubscriptionState::Paused,
        ] {
            assert_eq!(access_grant(&sub("s", status, 10), now()), AccessGrant::None);
        }
    }

    #[test]
    fn test_live_beats_grace_and_later_end_wins() {
        let grace = sub("grace", SubscriptionState::Canceled, 30);
        let live_short = sub("live_short", SubscriptionState::Active, 3);
        let live_long = sub("live_long", SubscriptionState::PastDue, 9);

        let status = evaluate_subscriptions(&[grace, live_short, live_long], now());
        assert!(status.has_access);
        assert_eq!(status.subscription_id.as_deref(), Some("live_long"));
        assert_eq!(status.status, "past_due");
    }

    #[test]
    fn test_no_valid_subscription_is_none() {
        let status = evaluate_subscriptions(&[sub("s", SubscriptionState::Unpaid, 10)], now());
        assert_eq!(status, SubscriptionStatus::none());
        assert_eq!(evaluate_subscriptions(&[], now()), SubscriptionStatus::none());
    }
}
