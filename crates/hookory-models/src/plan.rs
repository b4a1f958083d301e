//! Plan tiers and per-plan limits.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Monthly generations on the free plan by default.
pub const FREE_MONTHLY_LIMIT: u32 = 5;
/// Monthly generations on the creator plan by default.
pub const CREATOR_MONTHLY_LIMIT: u32 = 100;

/// Plan tier enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Creator,
}

impl PlanTier {
    /// Parse from string (case-insensitive). Unknown values map to `Free`.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "creator" => PlanTier::Creator,
            _ => PlanTier::Free,
        }
    }

    /// Tier implied by a paid-access decision.
    pub fn from_access(has_access: bool) -> Self {
        if has_access {
            PlanTier::Creator
        } else {
            PlanTier::Free
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, PlanTier::Creator)
    }

    /// Get the plan name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Creator => "creator",
        }
    }

    /// Human-readable label used in user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            PlanTier::Free => "Free",
            PlanTier::Creator => "Creator",
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-plan quota, cooldown and input limits.
///
/// Values are deployment configuration; defaults are the published plan limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanSettings {
    pub free_monthly_limit: u32,
    pub creator_monthly_limit: u32,
    pub free_cooldown_secs: u64,
    pub creator_cooldown_secs: u64,
    pub free_max_input_chars: usize,
    pub creator_max_input_chars: usize,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            free_monthly_limit: FREE_MONTHLY_LIMIT,
            creator_monthly_limit: CREATOR_MONTHLY_LIMIT,
            free_cooldown_secs: 45,
            creator_cooldown_secs: 30,
            free_max_input_chars: 5_000,
            creator_max_input_chars: 10_000,
        }
    }
}

impl PlanSettings {
    /// Create settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            free_monthly_limit: env_or("PLAN_FREE_MONTHLY_LIMIT", defaults.free_monthly_limit),
            creator_monthly_limit: env_or(
                "PLAN_CREATOR_MONTHLY_LIMIT",
                defaults.creator_monthly_limit,
            ),
            free_cooldown_secs: env_or("PLAN_FREE_COOLDOWN_SECS", defaults.free_cooldown_secs),
            creator_cooldown_secs: env_or(
                "PLAN_CREATOR_COOLDOWN_SECS",
                defaults.creator_cooldown_secs,
            ),
            free_max_input_chars: defaults.free_max_input_chars,
            creator_max_input_chars: defaults.creator_max_input_chars,
        }
    }

    /// Monthly generation limit for a tier.
    pub fn monthly_limit(&self, tier: PlanTier) -> u32 {
        match tier {
            PlanTier::Free => self.free_monthly_limit,
            PlanTier::Creator => self.creator_monthly_limit,
        }
    }

    /// Cooldown between generation calls for a tier.
    pub fn cooldown_secs(&self, tier: PlanTier) -> u64 {
        match tier {
            PlanTier::Free => self.free_cooldown_secs,
            PlanTier::Creator => self.creator_cooldown_secs,
        }
    }

    /// Maximum accepted input length (in characters) for a tier.
    pub fn max_input_chars(&self, tier: PlanTier) -> usize {
        match tier {
            PlanTier::Free => self.free_max_input_chars,
            PlanTier::Creator => self.creator_max_input_chars,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_tier_parsing() {
        assert_eq!(PlanTier::from_str("creator"), PlanTier::Creator);
        assert_eq!(PlanTier::from_str("CREATOR"), PlanTier::Creator);
        assert_eq!(PlanTier::from_str("free"), PlanTier::Free);
        assert_eq!(PlanTier::from_str("pro"), PlanTier::Free);
    }

    #[test]
    fn test_default_plan_limits() {
        let settings = PlanSettings::default();
        assert_eq!(settings.monthly_limit(PlanTier::Free), 5);
        assert_eq!(settings.monthly_limit(PlanTier::Creator), 100);
        assert_eq!(settings.cooldown_secs(PlanTier::Free), 45);
        assert_eq!(settings.cooldown_secs(PlanTier::Creator), 30);
        assert!(settings.max_input_chars(PlanTier::Creator) > settings.max_input_chars(PlanTier::Free));
    }

    #[test]
    fn test_plan_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PlanTier::Creator).unwrap(), "\"creator\"");
    }
}
