//! Billing-period boundary, cooldown and notification-threshold rules.
//!
//! These are pure functions over a profile snapshot. The usage ledger calls
//! them inside its read-modify-write transactions so that every entry point
//! applies the same boundary rule.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::PlanTier;
use crate::profile::UserProfile;

/// First instant of the calendar month after `now`, in UTC.
pub fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// Result of evaluating the usage boundary for a profile at `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    /// Counter value after the boundary rule is applied.
    pub usage_count: u32,
    /// Boundary that should be stored.
    pub reset_at: DateTime<Utc>,
    /// The stored boundary has been reached; the counter was reset.
    pub crossed: bool,
    /// Not crossed, but the stored boundary differs from `reset_at`.
    pub corrected: bool,
}

impl Boundary {
    /// Whether the profile needs a write to match this boundary.
    pub fn needs_write(&self) -> bool {
        self.crossed || self.corrected
    }
}

/// Apply the usage-boundary rule.
///
/// The effective boundary is the stored reset date, or the next month start
/// when none is stored. A creator with a future subscription period end uses
/// that period end instead. When `now` has reached the effective boundary the
/// counter resets and the next boundary is the next calendar month start.
pub fn recompute_boundary(profile: &UserProfile, now: DateTime<Utc>) -> Boundary {
    let stored = profile.usage_reset_at;
    let mut reset_at = stored.unwrap_or_else(|| next_month_start(now));

    if profile.plan == PlanTier::Creator {
        if let Some(period_end) = profile.subscription_period_end {
            if period_end > now {
                reset_at = period_end;
            }
        }
    }

    if now >= reset_at {
        return Boundary {
            usage_count: 0,
            reset_at: next_month_start(now),
            crossed: true,
            corrected: false,
        };
    }

    Boundary {
        usage_count: profile.usage_count,
        reset_at,
        crossed: false,
        corrected: stored != Some(reset_at),
    }
}

/// Cooldown decision for a generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownStatus {
    pub allowed: bool,
    pub seconds_remaining: u64,
}

impl CooldownStatus {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            seconds_remaining: 0,
        }
    }
}

/// Evaluate the cooldown window since the last successful generation.
///
/// Elapsed time is measured in whole seconds, rounded down.
pub fn cooldown_status(
    last_generate_at: Option<DateTime<Utc>>,
    cooldown_secs: u64,
    now: DateTime<Utc>,
) -> CooldownStatus {
    let Some(last) = last_generate_at else {
        return CooldownStatus::allowed();
    };

    let elapsed = (now - last).num_seconds();
    let cooldown = cooldown_secs as i64;
    if elapsed < cooldown {
        CooldownStatus {
            allowed: false,
            seconds_remaining: (cooldown - elapsed).max(0) as u64,
        }
    } else {
        CooldownStatus::allowed()
    }
}

/// Usage notification emails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageNotification {
    /// Usage reached 80% of the monthly limit.
    Warning,
    /// Usage reached the monthly limit.
    LimitReached,
}

impl UsageNotification {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageNotification::Warning => "warning",
            UsageNotification::LimitReached => "limit_reached",
        }
    }
}

/// One-shot flags, cleared whenever the counter resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationFlags {
    pub warning_sent: bool,
    pub limit_sent: bool,
}

impl NotificationFlags {
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            warning_sent: profile.usage_warning_email_sent,
            limit_sent: profile.usage_limit_email_sent,
        }
    }

    /// Flags after the given notifications have been scheduled.
    pub fn with_sent(mut self, sent: &[UsageNotification]) -> Self {
        for notification in sent {
            match notification {
                UsageNotification::Warning => self.warning_sent = true,
                UsageNotification::LimitReached => self.limit_sent = true,
            }
        }
        self
    }
}

/// Notifications due for a counter value, given the current flags.
///
/// The warning fires at 80% of the limit while still below it; the limit
/// notice fires once the counter reaches the limit. Uses integer arithmetic
/// so the 80% threshold is exact.
pub fn due_notifications(
    usage_count: u32,
    limit: u32,
    flags: NotificationFlags,
) -> Vec<UsageNotification> {
    let mut due = Vec::new();
    if limit == 0 {
        return due;
    }

    let count = u64::from(usage_count);
    let limit64 = u64::from(limit);

    if count * 5 >= limit64 * 4 && count < limit64 && !flags.warning_sent {
        due.push(UsageNotification::Warning);
    }
    if count >= limit64 && !flags.limit_sent {
        due.push(UsageNotification::LimitReached);
    }
    due
}
