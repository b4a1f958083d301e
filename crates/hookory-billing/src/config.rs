//! Billing configuration.

use std::time::Duration;

use crate::error::{BillingError, BillingResult};

/// Default Stripe API host. Request paths carry the `/v1` prefix.
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/";

/// Stripe credentials and endpoints.
///
/// Secrets are optional at startup; operations that need one fail with
/// [`BillingError::NotConfigured`] when it is missing.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    /// Price id of the creator subscription.
    pub price_id_creator: Option<String>,
    /// Overridable for stripe-mock and local tests.
    pub api_base: String,
    /// Deadline for a single provider call.
    pub timeout: Duration,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            price_id_creator: None,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

impl BillingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            secret_key: non_empty("STRIPE_SECRET_KEY"),
            webhook_secret: non_empty("STRIPE_WEBHOOK_SECRET"),
            price_id_creator: non_empty("STRIPE_PRICE_ID_CREATOR"),
            api_base: non_empty("STRIPE_API_BASE").unwrap_or(defaults.api_base),
            timeout: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn secret_key(&self) -> BillingResult<&str> {
        self.secret_key
            .as_deref()
            .ok_or(BillingError::NotConfigured("STRIPE_SECRET_KEY"))
    }

    pub fn webhook_secret(&self) -> BillingResult<&str> {
        self.webhook_secret
            .as_deref()
            .ok_or(BillingError::NotConfigured("STRIPE_WEBHOOK_SECRET"))
    }

    pub fn price_id_creator(&self) -> BillingResult<&str> {
        self.price_id_creator
            .as_deref()
            .ok_or(BillingError::NotConfigured("STRIPE_PRICE_ID_CREATOR"))
    }
}
