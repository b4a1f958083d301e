//! In-memory store implementations for tests.
//!
//! Versions are monotonically increasing counters, so precondition failures
//! behave like Firestore `updateTime` mismatches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use hookory_models::{CacheEntry, HistoryEntry, HistoryId, UserProfile};

use crate::cache_repo::CacheStore;
use crate::error::{FirestoreError, FirestoreResult};
use crate::history_repo::HistoryStore;
use crate::profile_repo::{ProfilePatch, ProfileStore, Versioned};

#[derive(Default)]
struct ProfileState {
    profiles: HashMap<String, (UserProfile, u64)>,
    next_version: u64,
}

/// Profile store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryProfileStore {
    state: Mutex<ProfileState>,
    pending_conflicts: AtomicU32,
    writes: AtomicU32,
    fail_all: AtomicBool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile directly.
    pub fn insert(&self, profile: UserProfile) {
        let mut state = self.state.lock().unwrap();
        state.next_version += 1;
        let version = state.next_version;
        state.profiles.insert(profile.id.clone(), (profile, version));
    }

    /// Current stored profile.
    pub fn snapshot(&self, uid: &str) -> Option<UserProfile> {
        self.state
            .lock()
            .unwrap()
            .profiles
            .get(uid)
            .map(|(p, _)| p.clone())
    }

    /// Make the next `n` conditional writes fail as if another writer won.
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Make every operation fail with a server error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_all.store(unavailable, Ordering::SeqCst);
    }

    /// Number of committed updates.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> FirestoreResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(FirestoreError::ServerError(503, "store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_profile(&self, uid: &str) -> FirestoreResult<Option<Versioned<UserProfile>>> {
        self.check_available()?;
        let found = self
            .state
            .lock()
            .unwrap()
            .profiles
            .get(uid)
            .map(|(p, v)| Versioned {
                value: p.clone(),
                version: Some(v.to_string()),
            });
        // Give concurrent tasks a chance to interleave between read and write.
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn create_profile(&self, profile: &UserProfile) -> FirestoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        if state.profiles.contains_key(&profile.id) {
            return Err(FirestoreError::AlreadyExists(format!("users/{}", profile.id)));
        }
        state.next_version += 1;
        let version = state.next_version;
        state
            .profiles
            .insert(profile.id.clone(), (profile.clone(), version));
        Ok(())
    }

    async fn update_profile(
        &self,
        uid: &str,
        patch: &ProfilePatch,
        precondition: Option<&str>,
    ) -> FirestoreResult<()> {
        self.check_available()?;
        if precondition.is_some() {
            let injected = self
                .pending_conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(FirestoreError::PreconditionFailed("injected conflict".into()));
            }
        }

        let mut state = self.state.lock().unwrap();
        state.next_version += 1;
        let next = state.next_version;
        let (profile, version) = state
            .profiles
            .get_mut(uid)
            .ok_or_else(|| FirestoreError::not_found(format!("users/{}", uid)))?;

        if let Some(expected) = precondition {
            if expected != version.to_string() {
                return Err(FirestoreError::PreconditionFailed(format!(
                    "users/{} changed since read",
                    uid
                )));
            }
        }

        patch.apply(profile, Utc::now());
        *version = next;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_by_billing_customer(
        &self,
        customer_id: &str,
    ) -> FirestoreResult<Option<UserProfile>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .profiles
            .values()
            .map(|(p, _)| p)
            .find(|p| p.billing_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }
}

/// Cache store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, entry: CacheEntry) {
        self.entries.lock().unwrap().insert(entry.key.clone(), entry);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get_entry(&self, key: &str) -> FirestoreResult<Option<CacheEntry>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(FirestoreError::ServerError(503, "cache unavailable".into()));
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put_entry(&self, entry: &CacheEntry) -> FirestoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FirestoreError::ServerError(503, "cache unavailable".into()));
        }
        self.insert(entry.clone());
        Ok(())
    }

    async fn delete_entry(&self, key: &str) -> FirestoreResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// History store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<HashMap<HistoryId, HistoryEntry>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_for_user(&self, user_id: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn save(&self, entry: &HistoryEntry) -> FirestoreResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        fetch_limit: u32,
    ) -> FirestoreResult<Vec<HistoryEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.user_id == user_id)
            .take(fetch_limit as usize)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &HistoryId) -> FirestoreResult<Option<HistoryEntry>> {
        Ok(self.entries.lock().unwrap().get(id).cloned())
    }

    async fn delete(&self, id: &HistoryId) -> FirestoreResult<()> {
        self.entries.lock().unwrap().remove(id);
        Ok(())
    }
}
