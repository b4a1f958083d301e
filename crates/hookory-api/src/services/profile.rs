//! Profile bootstrap for authenticated callers.

use std::sync::Arc;

use chrono::Utc;
use hookory_firestore::{FirestoreError, ProfilePatch, ProfileStore};
use hookory_models::{PlanSettings, PlanTier, UserProfile};
use tracing::{info, warn};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct ProfileService {
    store: Arc<dyn ProfileStore>,
    plans: PlanSettings,
}

impl ProfileService {
    pub fn new(store: Arc<dyn ProfileStore>, plans: PlanSettings) -> Self {
        Self { store, plans }
    }

    /// Load the caller's profile, creating it on first sight.
    ///
    /// Identity fields (email, display name, verification) follow the token.
    pub async fn get_or_create(&self, user: &AuthUser) -> ApiResult<UserProfile> {
        if let Some(existing) = self.store.get_profile(&user.uid).await? {
            return self.refresh_identity(existing.value, user).await;
        }

        let profile = UserProfile::new(&user.uid, &self.plans, Utc::now())
            .with_email(user.email.clone())
            .with_display_name(user.name.clone())
            .with_email_verified(user.email_verified);

        match self.store.create_profile(&profile).await {
            Ok(()) => {
                info!(user_id = %user.uid, "Created new user profile");
                Ok(profile)
            }
            // Another request created it first.
            Err(FirestoreError::AlreadyExists(_)) => self
                .store
                .get_profile(&user.uid)
                .await?
                .map(|v| v.value)
                .ok_or_else(|| ApiError::internal("Profile vanished after concurrent create")),
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_identity(
        &self,
        mut profile: UserProfile,
        user: &AuthUser,
    ) -> ApiResult<UserProfile> {
        let mut patch = ProfilePatch::default();
        if user.email.is_some() && profile.email != user.email {
            patch.email = Some(user.email.clone());
        }
        if user.name.is_some() && profile.display_name != user.name {
            patch.display_name = Some(user.name.clone());
        }
        if profile.email_verified != user.email_verified {
            patch.email_verified = Some(user.email_verified);
        }
        if patch.is_empty() {
            return Ok(profile);
        }

        if let Err(e) = self.store.update_profile(&user.uid, &patch, None).await {
            warn!(user_id = %user.uid, error = %e, "Failed to refresh profile identity fields");
        }
        patch.apply(&mut profile, Utc::now());
        Ok(profile)
    }

    /// Detach billing and drop back to the free plan.
    pub async fn deactivate(&self, uid: &str) -> ApiResult<()> {
        let patch = ProfilePatch {
            plan: Some(PlanTier::Free),
            usage_limit_monthly: Some(self.plans.monthly_limit(PlanTier::Free)),
            billing_customer_id: Some(None),
            billing_subscription_id: Some(None),
            billing_status: Some(None),
            ..Default::default()
        };
        self.store.update_profile(uid, &patch, None).await?;
        info!(user_id = %uid, "Account deactivated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookory_firestore::memory::MemoryProfileStore;

    fn user(uid: &str) -> AuthUser {
        AuthUser {
            uid: uid.to_string(),
            email: Some("ada@example.com".into()),
            email_verified: true,
            name: Some("Ada".into()),
        }
    }

    #[tokio::test]
    async fn test_first_request_creates_free_profile() {
        let store = Arc::new(MemoryProfileStore::new());
        let service = ProfileService::new(store.clone(), PlanSettings::default());

        let profile = service.get_or_create(&user("u1")).await.unwrap();
        assert_eq!(profile.plan, PlanTier::Free);
        assert_eq!(profile.usage_limit_monthly, 5);
        assert!(profile.usage_reset_at.unwrap() > Utc::now());
        assert!(profile.email_verified);
        assert_eq!(store.snapshot("u1").unwrap().email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn test_identity_fields_are_refreshed() {
        let store = Arc::new(MemoryProfileStore::new());
        store.insert(
            UserProfile::new("u1", &PlanSettings::default(), Utc::now())
                .with_email(Some("old@example.com".into())),
        );
        let service = ProfileService::new(store.clone(), PlanSettings::default());

        let profile = service.get_or_create(&user("u1")).await.unwrap();
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
        let stored = store.snapshot("u1").unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("Ada"));
        assert!(stored.email_verified);
    }

    #[tokio::test]
    async fn test_deactivate_clears_billing() {
        let store = Arc::new(MemoryProfileStore::new());
        let mut p = UserProfile::new("u1", &PlanSettings::default(), Utc::now());
        p.plan = PlanTier::Creator;
        p.usage_limit_monthly = 100;
        p.billing_customer_id = Some("cus_1".into());
        p.billing_status = Some("active".into());
        store.insert(p);
        let service = ProfileService::new(store.clone(), PlanSettings::default());

        service.deactivate("u1").await.unwrap();
        let stored = store.snapshot("u1").unwrap();
        assert_eq!(stored.plan, PlanTier::Free);
        assert_eq!(stored.usage_limit_monthly, 5);
        assert!(stored.billing_customer_id.is_none());
        assert!(stored.billing_status.is_none());
    }
}
