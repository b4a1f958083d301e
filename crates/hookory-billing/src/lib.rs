//! Billing provider integration for Hookory.
//!
//! A Stripe client behind the [`BillingProvider`] trait, webhook signature
//! verification, and the rule that decides whether a customer's
//! subscriptions grant paid access.

#![recursion_limit = "256"]

pub mod config;
pub mod error;
pub mod provider;
pub mod status;
pub mod stripe_client;
pub mod types;
pub mod webhook;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

#[cfg(test)]
mod fixtures;

pub use config::BillingConfig;
pub use error::{BillingError, BillingResult};
pub use provider::{BillingProvider, CreateCheckoutParams, CreateCustomerParams};
pub use status::{access_grant, evaluate_subscriptions, AccessGrant};
pub use stripe_client::StripeClient;
pub use types::{
    CheckoutSession, Customer, Event, EventKind, EventObject, Invoice, PortalSession,
    Subscription, SubscriptionState, METADATA_USER_ID,
};
pub use webhook::{WebhookVerifier, SIGNATURE_HEADER};

#[cfg(any(test, feature = "test-support"))]
pub use webhook::sign_payload;
