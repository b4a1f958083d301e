//! Optimistic read-modify-write over a single profile document.
//!
//! Each attempt reads the profile and its version, lets the caller decide on
//! a patch, then writes with an `updateTime` precondition. A lost race
//! re-reads and re-decides, so the decision always sees the latest state.

use std::time::Duration;

use hookory_models::UserProfile;
use tracing::debug;

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_transaction_conflict;
use crate::profile_repo::{ProfilePatch, ProfileStore, USERS_COLLECTION};
use crate::retry::full_jitter;

/// Maximum attempts before giving up on a contended document.
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// Backoff ceiling after the first conflict, doubled per attempt (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Upper bound for the backoff ceiling (milliseconds).
const RETRY_MAX_DELAY_MS: u64 = 1000;

/// What a transaction body decided for the snapshot it was shown.
#[derive(Debug)]
pub enum TxDecision<R> {
    /// Write the patch and return the output once the write commits.
    Write(ProfilePatch, R),
    /// Leave the document untouched.
    Skip(R),
}

/// Run `decide` against the current profile and commit its patch atomically.
///
/// `decide` may run several times and must not have side effects. A `Write`
/// decision for a missing profile fails with `NotFound`.
pub async fn run_transaction<S, F, R>(store: &S, uid: &str, mut decide: F) -> FirestoreResult<R>
where
    S: ProfileStore + ?Sized,
    F: FnMut(Option<&UserProfile>) -> FirestoreResult<TxDecision<R>>,
{
    for attempt in 0..MAX_TRANSACTION_ATTEMPTS {
        let snapshot = store.get_profile(uid).await?;

        let (patch, output) = match decide(snapshot.as_ref().map(|s| &s.value))? {
            TxDecision::Skip(output) => return Ok(output),
            TxDecision::Write(patch, output) => (patch, output),
        };

        let Some(snapshot) = snapshot else {
            return Err(FirestoreError::not_found(format!("{}/{}", USERS_COLLECTION, uid)));
        };

        match store
            .update_profile(uid, &patch, snapshot.version.as_deref())
            .await
        {
            Ok(()) => return Ok(output),
            Err(e) if e.is_precondition_failed() => {
                debug!(
                    user_id = %uid,
                    attempt = attempt + 1,
                    "Profile transaction precondition failed, retrying"
                );
                record_transaction_conflict(USERS_COLLECTION);
                tokio::time::sleep(conflict_backoff(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(FirestoreError::Contention(MAX_TRANSACTION_ATTEMPTS))
}

/// Randomized so that callers who lost the same race do not wake together.
fn conflict_backoff(attempt: u32) -> Duration {
    let ceiling = RETRY_BASE_DELAY_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY_MS);
    Duration::from_millis(full_jitter(ceiling).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryProfileStore;
    use chrono::Utc;
    use hookory_models::PlanSettings;
    use std::sync::Arc;

    fn seeded(uid: &str) -> MemoryProfileStore {
        let store = MemoryProfileStore::new();
        store.insert(UserProfile::new(uid, &PlanSettings::default(), Utc::now()));
        store
    }

    #[tokio::test]
    async fn test_skip_does_not_write() {
        let store = seeded("u1");
        let out = run_transaction(&store, "u1", |p| {
            Ok(TxDecision::Skip(p.map(|p| p.usage_count)))
        })
        .await
        .unwrap();
        assert_eq!(out, Some(0));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_write_commits_patch() {
        let store = seeded("u1");
        run_transaction(&store, "u1", |p| {
            let count = p.map(|p| p.usage_count).unwrap_or(0);
            Ok(TxDecision::Write(
                ProfilePatch {
                    usage_count: Some(count + 1),
                    ..Default::default()
                },
                (),
            ))
        })
        .await
        .unwrap();
        assert_eq!(store.snapshot("u1").unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn test_conflict_rereads_and_retries() {
        let store = seeded("u1");
        store.inject_conflicts(2);
        let mut calls = 0;
        run_transaction(&store, "u1", |_| {
            calls += 1;
            Ok(TxDecision::Write(
                ProfilePatch {
                    usage_count: Some(7),
                    ..Default::default()
                },
                (),
            ))
        })
        .await
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(store.snapshot("u1").unwrap().usage_count, 7);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let store = seeded("u1");
        store.inject_conflicts(MAX_TRANSACTION_ATTEMPTS);
        let err = run_transaction(&store, "u1", |_| {
            Ok(TxDecision::Write(ProfilePatch::default(), ()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FirestoreError::Contention(_)));
    }

    #[tokio::test]
    async fn test_write_on_missing_profile_is_not_found() {
        let store = MemoryProfileStore::new();
        let err = run_transaction(&store, "ghost", |_| {
            Ok(TxDecision::Write(ProfilePatch::default(), ()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FirestoreError::NotFound(_)));
    }

    #[test]
    fn test_conflict_backoff_is_bounded() {
        for attempt in 0..MAX_TRANSACTION_ATTEMPTS + 3 {
            let delay = conflict_backoff(attempt);
            assert!(delay >= Duration::from_millis(1));
            assert!(delay <= Duration::from_millis(RETRY_MAX_DELAY_MS));
        }
    }

    #[tokio::test]
    async fn test_concurrent_increments_all_commit() {
        let store = Arc::new(seeded("u1"));
        let writers = MAX_TRANSACTION_ATTEMPTS as usize + 3;

        let handles: Vec<_> = (0..writers)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    run_transaction(store.as_ref(), "u1", |p| {
                        let count = p.map(|p| p.usage_count).unwrap_or(0);
                        Ok(TxDecision::Write(
                            ProfilePatch {
                                usage_count: Some(count + 1),
                                ..Default::default()
                            },
                            (),
                        ))
                    })
                    .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.snapshot("u1").unwrap().usage_count, writers as u32);
    }
}
