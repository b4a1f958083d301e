//! Billing provider error types.

use stripe::StripeError;
use thiserror::Error;

/// Result type for billing operations.
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors that can occur talking to the billing provider.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Billing not configured: {0} is not set")]
    NotConfigured(&'static str),

    #[error("Invalid billing configuration: {0}")]
    InvalidConfig(String),

    #[error("Billing provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Billing client error: {0}")]
    Client(String),

    #[error("Billing request timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl BillingError {
    pub fn invalid_signature(msg: impl Into<String>) -> Self {
        Self::InvalidSignature(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    /// True for provider-side 404s (unknown customer, subscription, ...).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

impl From<StripeError> for BillingError {
    fn from(e: StripeError) -> Self {
        match e {
            StripeError::Stripe(err) => Self::Api {
                status: err.http_status,
                message: err.message.unwrap_or_default(),
            },
            other => Self::Client(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}
