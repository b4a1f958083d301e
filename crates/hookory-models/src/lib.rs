//! Shared data models for the Hookory backend.
//!
//! This crate provides Serde-serializable types for:
//! - User profiles and plan tiers
//! - Usage boundaries, cooldowns and notification thresholds
//! - Content cache entries and generation history

pub mod cache;
pub mod generation;
pub mod history;
pub mod plan;
pub mod profile;
pub mod subscription;
pub mod usage;

// Re-export common types
pub use cache::{CacheEntry, DEFAULT_CACHE_TTL_DAYS};
pub use generation::{
    GenerationContext, Goal, InputType, OutputFormat, PostStyle, ResolvedContext, TonePreset,
};
pub use history::{HistoryEntry, HistoryId, HistorySummary};
pub use plan::{PlanSettings, PlanTier};
pub use profile::UserProfile;
pub use subscription::SubscriptionStatus;
pub use usage::{
    cooldown_status, due_notifications, next_month_start, recompute_boundary, Boundary,
    CooldownStatus, NotificationFlags, UsageNotification,
};
