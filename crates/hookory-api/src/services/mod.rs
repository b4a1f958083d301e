//! Business logic services.

pub mod background;
pub mod cache;
pub mod email;
pub mod entitlement;
pub mod extract;
pub mod generation;
pub mod profile;
pub mod usage;
pub mod webhook;

pub use background::BackgroundTasks;
pub use cache::ContentCache;
pub use email::{EmailSender, ResendSender};
pub use entitlement::EntitlementReconciler;
pub use extract::UrlExtractor;
pub use generation::{ContentGenerator, OpenAiGenerator};
pub use profile::ProfileService;
pub use usage::{UsageLedger, UsageNotifier};
pub use webhook::WebhookEventProcessor;
