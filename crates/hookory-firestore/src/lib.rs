//! Firestore REST API client and document stores.
//!
//! This crate provides:
//! - Profile, cache and history stores behind async traits
//! - Optimistic read-modify-write transactions on profiles
//! - Service account authentication via gcp_auth
//! - Retry with backoff, request metrics
//! - In-memory store implementations (`test-support` feature)

pub mod cache_repo;
pub mod client;
pub mod error;
pub mod history_repo;
pub mod metrics;
pub mod profile_repo;
pub mod retry;
pub mod token_cache;
pub mod transaction;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

#[cfg(test)]
mod client_tests;

pub use cache_repo::{CacheStore, FirestoreCacheStore, CACHE_COLLECTION};
pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use history_repo::{FirestoreHistoryStore, HistoryStore, HISTORY_COLLECTION};
pub use profile_repo::{FirestoreProfileStore, ProfilePatch, ProfileStore, Versioned};
pub use transaction::{run_transaction, TxDecision};
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
