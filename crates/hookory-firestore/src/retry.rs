//! Retry policy for idempotent Firestore calls.
//!
//! Exponential backoff with full jitter, honoring server backoff hints on 429.
//! Conditional writes are not retried here; lost precondition races are
//! handled by [`crate::transaction`], which must re-read before writing again.

use std::time::{Duration, SystemTime};

use tracing::{info_span, warn, Instrument};

use crate::error::FirestoreResult;
use crate::metrics::record_retry;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str, default: u64| -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        Self {
            max_retries: read("FIRESTORE_MAX_RETRIES", defaults.max_retries as u64) as u32,
            base_delay_ms: read("FIRESTORE_RETRY_BASE_MS", defaults.base_delay_ms),
            max_delay_ms: read("FIRESTORE_RETRY_MAX_MS", defaults.max_delay_ms),
        }
    }
}

/// Run `op`, retrying network errors, 429s and 5xx responses.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    op: F,
) -> FirestoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = FirestoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        let span = info_span!("firestore_retry", operation = %operation, attempt = attempt + 1);

        let err = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() || attempt >= config.max_retries {
            return Err(err);
        }

        let delay = backoff_delay(config, attempt, err.retry_after_ms());
        warn!(
            operation = %operation,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Firestore operation failed, retrying: {}",
            err
        );
        record_retry(operation);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Delay before the next attempt.
fn backoff_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    if let Some(after) = retry_after_ms {
        return Duration::from_millis(after);
    }

    let ceiling = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_delay_ms);

    Duration::from_millis(full_jitter(ceiling).max(config.base_delay_ms))
}

/// Uniform delay in `0..=ceiling_ms`.
///
/// Seeded from the clock's sub-second nanos; no rand dependency.
pub(crate) fn full_jitter(ceiling_ms: u64) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    ceiling_ms * u64::from(nanos % 1001) / 1000
}
