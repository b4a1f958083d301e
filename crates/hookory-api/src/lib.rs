//! Axum HTTP API server for post generation, usage metering and billing.
//!
//! This crate provides:
//! - Cached content generation with per-user monthly quotas and cooldowns
//! - Subscription entitlement checks against the billing provider
//! - Signed billing webhook processing
//! - Firebase ID token verification
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{
    ContentCache, EntitlementReconciler, UsageLedger, WebhookEventProcessor,
};
pub use state::{AppState, Collaborators};
