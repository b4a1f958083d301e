//! User profile persistence.
//!
//! Profiles live in the `users` collection keyed by identity id. Every
//! mutation goes through [`ProfilePatch`], which names exactly the fields it
//! writes so concurrent writers touching different fields do not clobber each
//! other.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookory_models::{PlanSettings, PlanTier, UserProfile};
use tracing::{debug, info};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{Document, FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value};

/// Collection holding user profiles.
pub const USERS_COLLECTION: &str = "users";

mod fields {
    pub const EMAIL: &str = "email";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const EMAIL_VERIFIED: &str = "emailVerified";
    pub const PLAN: &str = "plan";
    pub const USAGE_COUNT: &str = "usageCount";
    pub const USAGE_LIMIT_MONTHLY: &str = "usageLimitMonthly";
    pub const USAGE_RESET_AT: &str = "usageResetAt";
    pub const LAST_GENERATE_AT: &str = "lastGenerateAt";
    pub const BILLING_CUSTOMER_ID: &str = "billingCustomerId";
    pub const BILLING_SUBSCRIPTION_ID: &str = "billingSubscriptionId";
    pub const BILLING_STATUS: &str = "billingStatus";
    pub const PERIOD_START: &str = "subscriptionPeriodStart";
    pub const PERIOD_END: &str = "subscriptionPeriodEnd";
    pub const WARNING_SENT: &str = "usageWarningEmailSent";
    pub const LIMIT_SENT: &str = "usageLimitEmailSent";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// A stored value together with the version token used for preconditions.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    /// Opaque version (Firestore `updateTime`). `None` skips the precondition.
    pub version: Option<String>,
}

/// Partial profile update. `None` leaves a field untouched; for nullable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilePatch {
    pub email: Option<Option<String>>,
    pub display_name: Option<Option<String>>,
    pub email_verified: Option<bool>,
    pub plan: Option<PlanTier>,
    pub usage_count: Option<u32>,
    pub usage_limit_monthly: Option<u32>,
    pub usage_reset_at: Option<DateTime<Utc>>,
    pub last_generate_at: Option<DateTime<Utc>>,
    pub billing_customer_id: Option<Option<String>>,
    pub billing_subscription_id: Option<Option<String>>,
    pub billing_status: Option<Option<String>>,
    pub subscription_period_start: Option<Option<DateTime<Utc>>>,
    pub subscription_period_end: Option<Option<DateTime<Utc>>>,
    pub usage_warning_email_sent: Option<bool>,
    pub usage_limit_email_sent: Option<bool>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to an in-memory profile.
    pub fn apply(&self, profile: &mut UserProfile, now: DateTime<Utc>) {
        if let Some(v) = &self.email {
            profile.email = v.clone();
        }
        if let Some(v) = &self.display_name {
            profile.display_name = v.clone();
        }
        if let Some(v) = self.email_verified {
            profile.email_verified = v;
        }
        if let Some(v) = self.plan {
            profile.plan = v;
        }
        if let Some(v) = self.usage_count {
            profile.usage_count = v;
        }
        if let Some(v) = self.usage_limit_monthly {
            profile.usage_limit_monthly = v;
        }
        if let Some(v) = self.usage_reset_at {
            profile.usage_reset_at = Some(v);
        }
        if let Some(v) = self.last_generate_at {
            profile.last_generate_at = Some(v);
        }
        if let Some(v) = &self.billing_customer_id {
            profile.billing_customer_id = v.clone();
        }
        if let Some(v) = &self.billing_subscription_id {
            profile.billing_subscription_id = v.clone();
        }
        if let Some(v) = &self.billing_status {
            profile.billing_status = v.clone();
        }
        if let Some(v) = self.subscription_period_start {
            profile.subscription_period_start = v;
        }
        if let Some(v) = self.subscription_period_end {
            profile.subscription_period_end = v;
        }
        if let Some(v) = self.usage_warning_email_sent {
            profile.usage_warning_email_sent = v;
        }
        if let Some(v) = self.usage_limit_email_sent {
            profile.usage_limit_email_sent = v;
        }
        profile.updated_at = now;
    }

    /// Encode as Firestore fields plus the matching update mask.
    pub fn to_fields(&self, now: DateTime<Utc>) -> (HashMap<String, Value>, Vec<String>) {
        let mut out = HashMap::new();
        let mut put = |name: &str, value: Value| {
            out.insert(name.to_string(), value);
        };

        if let Some(v) = &self.email {
            put(fields::EMAIL, v.to_firestore_value());
        }
        if let Some(v) = &self.display_name {
            put(fields::DISPLAY_NAME, v.to_firestore_value());
        }
        if let Some(v) = self.email_verified {
            put(fields::EMAIL_VERIFIED, v.to_firestore_value());
        }
        if let Some(v) = self.plan {
            put(fields::PLAN, v.as_str().to_firestore_value());
        }
        if let Some(v) = self.usage_count {
            put(fields::USAGE_COUNT, v.to_firestore_value());
        }
        if let Some(v) = self.usage_limit_monthly {
            put(fields::USAGE_LIMIT_MONTHLY, v.to_firestore_value());
        }
        if let Some(v) = self.usage_reset_at {
            put(fields::USAGE_RESET_AT, v.to_firestore_value());
        }
        if let Some(v) = self.last_generate_at {
            put(fields::LAST_GENERATE_AT, v.to_firestore_value());
        }
        if let Some(v) = &self.billing_customer_id {
            put(fields::BILLING_CUSTOMER_ID, v.to_firestore_value());
        }
        if let Some(v) = &self.billing_subscription_id {
            put(fields::BILLING_SUBSCRIPTION_ID, v.to_firestore_value());
        }
        if let Some(v) = &self.billing_status {
            put(fields::BILLING_STATUS, v.to_firestore_value());
        }
        if let Some(v) = self.subscription_period_start {
            put(fields::PERIOD_START, v.to_firestore_value());
        }
        if let Some(v) = self.subscription_period_end {
            put(fields::PERIOD_END, v.to_firestore_value());
        }
        if let Some(v) = self.usage_warning_email_sent {
            put(fields::WARNING_SENT, v.to_firestore_value());
        }
        if let Some(v) = self.usage_limit_email_sent {
            put(fields::LIMIT_SENT, v.to_firestore_value());
        }
        put(fields::UPDATED_AT, now.to_firestore_value());

        let mut mask: Vec<String> = out.keys().cloned().collect();
        mask.sort();
        (out, mask)
    }
}

/// Storage for user profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch a profile with its version token.
    async fn get_profile(&self, uid: &str) -> FirestoreResult<Option<Versioned<UserProfile>>>;

    /// Insert a new profile. Fails with `AlreadyExists` if one is present.
    async fn create_profile(&self, profile: &UserProfile) -> FirestoreResult<()>;

    /// Apply a patch. With `precondition` set the write fails with
    /// `PreconditionFailed` if the stored version changed.
    async fn update_profile(
        &self,
        uid: &str,
        patch: &ProfilePatch,
        precondition: Option<&str>,
    ) -> FirestoreResult<()>;

    /// Find the profile linked to a billing customer id.
    async fn find_by_billing_customer(
        &self,
        customer_id: &str,
    ) -> FirestoreResult<Option<UserProfile>>;
}

/// Decode a profile document. Missing counters and flags default to zero/false;
/// a missing limit defaults to the plan's reference limit.
pub fn profile_from_document(uid: &str, doc: &Document) -> UserProfile {
    let now = Utc::now();
    let plan = doc
        .get::<String>(fields::PLAN)
        .map(|p| PlanTier::from_str(&p))
        .unwrap_or_default();
    UserProfile {
        id: uid.to_string(),
        email: doc.get(fields::EMAIL),
        display_name: doc.get(fields::DISPLAY_NAME),
        email_verified: doc.get(fields::EMAIL_VERIFIED).unwrap_or(false),
        plan,
        usage_count: doc.get(fields::USAGE_COUNT).unwrap_or(0),
        usage_limit_monthly: doc
            .get(fields::USAGE_LIMIT_MONTHLY)
            .unwrap_or_else(|| PlanSettings::default().monthly_limit(plan)),
        usage_reset_at: doc.get(fields::USAGE_RESET_AT),
        last_generate_at: doc.get(fields::LAST_GENERATE_AT),
        billing_customer_id: doc.get(fields::BILLING_CUSTOMER_ID),
        billing_subscription_id: doc.get(fields::BILLING_SUBSCRIPTION_ID),
        billing_status: doc.get(fields::BILLING_STATUS),
        subscription_period_start: doc.get(fields::PERIOD_START),
        subscription_period_end: doc.get(fields::PERIOD_END),
        usage_warning_email_sent: doc.get(fields::WARNING_SENT).unwrap_or(false),
        usage_limit_email_sent: doc.get(fields::LIMIT_SENT).unwrap_or(false),
        created_at: doc.get(fields::CREATED_AT).unwrap_or(now),
        updated_at: doc.get(fields::UPDATED_AT).unwrap_or(now),
    }
}

/// Encode a full profile for document creation.
pub fn profile_to_fields(profile: &UserProfile) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    out.insert(fields::EMAIL.into(), profile.email.to_firestore_value());
    out.insert(fields::DISPLAY_NAME.into(), profile.display_name.to_firestore_value());
    out.insert(fields::EMAIL_VERIFIED.into(), profile.email_verified.to_firestore_value());
    out.insert(fields::PLAN.into(), profile.plan.as_str().to_firestore_value());
    out.insert(fields::USAGE_COUNT.into(), profile.usage_count.to_firestore_value());
    out.insert(
        fields::USAGE_LIMIT_MONTHLY.into(),
        profile.usage_limit_monthly.to_firestore_value(),
    );
    out.insert(fields::USAGE_RESET_AT.into(), profile.usage_reset_at.to_firestore_value());
    out.insert(fields::LAST_GENERATE_AT.into(), profile.last_generate_at.to_firestore_value());
    out.insert(
        fields::BILLING_CUSTOMER_ID.into(),
        profile.billing_customer_id.to_firestore_value(),
    );
    out.insert(
        fields::BILLING_SUBSCRIPTION_ID.into(),
        profile.billing_subscription_id.to_firestore_value(),
    );
    out.insert(fields::BILLING_STATUS.into(), profile.billing_status.to_firestore_value());
    out.insert(fields::PERIOD_START.into(), profile.subscription_period_start.to_firestore_value());
    out.insert(fields::PERIOD_END.into(), profile.subscription_period_end.to_firestore_value());
    out.insert(fields::WARNING_SENT.into(), profile.usage_warning_email_sent.to_firestore_value());
    out.insert(fields::LIMIT_SENT.into(), profile.usage_limit_email_sent.to_firestore_value());
    out.insert(fields::CREATED_AT.into(), profile.created_at.to_firestore_value());
    out.insert(fields::UPDATED_AT.into(), profile.updated_at.to_firestore_value());
    out
}

/// Firestore-backed profile store.
#[derive(Clone)]
pub struct FirestoreProfileStore {
    client: FirestoreClient,
}

impl FirestoreProfileStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProfileStore for FirestoreProfileStore {
    async fn get_profile(&self, uid: &str) -> FirestoreResult<Option<Versioned<UserProfile>>> {
        let doc = self
            .client
            .with_retry("get_profile", || {
                self.client.get_document(USERS_COLLECTION, uid)
            })
            .await?;

        Ok(doc.map(|d| Versioned {
            value: profile_from_document(uid, &d),
            version: d.update_time.clone(),
        }))
    }

    async fn create_profile(&self, profile: &UserProfile) -> FirestoreResult<()> {
        self.client
            .create_document(USERS_COLLECTION, &profile.id, profile_to_fields(profile))
            .await?;
        info!(user_id = %profile.id, plan = %profile.plan, "Created user profile");
        Ok(())
    }

    async fn update_profile(
        &self,
        uid: &str,
        patch: &ProfilePatch,
        precondition: Option<&str>,
    ) -> FirestoreResult<()> {
        let (fields, mask) = patch.to_fields(Utc::now());
        self.client
            .update_document_with_precondition(USERS_COLLECTION, uid, fields, Some(mask), precondition)
            .await?;
        debug!(user_id = %uid, "Updated user profile");
        Ok(())
    }

    async fn find_by_billing_customer(
        &self,
        customer_id: &str,
    ) -> FirestoreResult<Option<UserProfile>> {
        let query = StructuredQuery::collection(USERS_COLLECTION)
            .where_eq(fields::BILLING_CUSTOMER_ID, customer_id.to_firestore_value())
            .limit(1);

        let docs = self
            .client
            .with_retry("find_profile_by_customer", || self.client.run_query(query.clone()))
            .await?;

        docs.first()
            .map(|doc| {
                let uid = doc.doc_id().ok_or_else(|| {
                    FirestoreError::invalid_response("query result without document name")
                })?;
                Ok(profile_from_document(uid, doc))
            })
            .transpose()
    }
}
