//! Tests for error classification, retry policy and client config.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serial_test::serial;

use crate::client::FirestoreConfig;
use crate::error::FirestoreError;
use crate::retry::{with_retry, RetryConfig};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

// =============================================================================
// Error Classification
// =============================================================================

#[test]
fn test_error_from_http_status() {
    assert!(matches!(
        FirestoreError::from_http_status(429, "slow down"),
        FirestoreError::RateLimited(_)
    ));
    assert!(matches!(
        FirestoreError::from_http_status(503, "unavailable"),
        FirestoreError::ServerError(503, _)
    ));
    assert!(matches!(
        FirestoreError::from_http_status(404, "missing"),
        FirestoreError::NotFound(_)
    ));
    assert!(matches!(
        FirestoreError::from_http_status(409, "exists"),
        FirestoreError::AlreadyExists(_)
    ));
    assert!(matches!(
        FirestoreError::from_http_status(400, "bad"),
        FirestoreError::RequestFailed(_)
    ));
}

#[test]
fn test_precondition_status_is_detected() {
    let err = FirestoreError::from_http_status(412, "stale updateTime");
    assert!(err.is_precondition_failed());
    assert!(!err.is_retryable());

    let err = FirestoreError::request_failed("FAILED_PRECONDITION: document changed");
    assert!(err.is_precondition_failed());
}

#[test]
fn test_retryable_classification() {
    assert!(FirestoreError::ServerError(500, "boom".into()).is_retryable());
    assert!(FirestoreError::RateLimited(100).is_retryable());
    assert!(!FirestoreError::not_found("users/x").is_retryable());
    assert!(!FirestoreError::Contention(5).is_retryable());
    assert_eq!(FirestoreError::RateLimited(2000).retry_after_ms(), Some(2000));
    assert_eq!(FirestoreError::Contention(5).http_status(), Some(409));
}

// =============================================================================
// Retry Policy
// =============================================================================

#[tokio::test]
async fn test_retry_recovers_from_transient_errors() {
    let calls = AtomicU32::new(0);
    let result = with_retry(&fast_retry(), "test_op", || async {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            Err(FirestoreError::ServerError(503, "unavailable".into()))
        } else {
            Ok(n)
        }
    })
    .await
    .unwrap();

    assert_eq!(result, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_stops_on_permanent_error() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = with_retry(&fast_retry(), "test_op", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(FirestoreError::PermissionDenied("nope".into()))
    })
    .await;

    assert!(matches!(result, Err(FirestoreError::PermissionDenied(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_retries() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = with_retry(&fast_retry(), "test_op", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(FirestoreError::ServerError(500, "still down".into()))
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

// =============================================================================
// Config
// =============================================================================

#[test]
#[serial]
fn test_config_accepts_firebase_project_id() {
    std::env::remove_var("GCP_PROJECT_ID");
    std::env::set_var("FIREBASE_PROJECT_ID", "firebase-project");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.project_id, "firebase-project");
    std::env::remove_var("FIREBASE_PROJECT_ID");
}

#[test]
#[serial]
fn test_config_parses_retry_env_vars() {
    std::env::set_var("GCP_PROJECT_ID", "test");
    std::env::set_var("FIRESTORE_RETRY_BASE_MS", "50");
    std::env::set_var("FIRESTORE_RETRY_MAX_MS", "2000");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.retry.base_delay_ms, 50);
    assert_eq!(config.retry.max_delay_ms, 2000);
    std::env::remove_var("FIRESTORE_RETRY_BASE_MS");
    std::env::remove_var("FIRESTORE_RETRY_MAX_MS");
}

#[test]
#[serial]
fn test_config_handles_invalid_timeout() {
    std::env::set_var("GCP_PROJECT_ID", "test");
    std::env::set_var("FIRESTORE_CONNECT_TIMEOUT_SECS", "not-a-number");
    let config = FirestoreConfig::from_env().unwrap();
    assert_eq!(config.connect_timeout, Duration::from_secs(5));
    std::env::remove_var("FIRESTORE_CONNECT_TIMEOUT_SECS");
}
