//! Application state.

use std::sync::Arc;

use hookory_billing::{BillingProvider, StripeClient};
use hookory_firestore::{
    CacheStore, FirestoreCacheStore, FirestoreClient, FirestoreConfig, FirestoreHistoryStore,
    FirestoreProfileStore, HistoryStore, ProfileStore,
};

use crate::auth::{IdentityVerifier, JwksVerifier};
use crate::config::ApiConfig;
use crate::services::{
    BackgroundTasks, ContentCache, ContentGenerator, EmailSender, EntitlementReconciler,
    OpenAiGenerator, ProfileService, ResendSender, UrlExtractor, UsageLedger, UsageNotifier,
    WebhookEventProcessor,
};

/// External collaborators the services are built on.
pub struct Collaborators {
    pub profiles: Arc<dyn ProfileStore>,
    pub cache: Arc<dyn CacheStore>,
    pub history: Arc<dyn HistoryStore>,
    pub billing: Arc<dyn BillingProvider>,
    pub generator: Arc<dyn ContentGenerator>,
    pub email: Arc<dyn EmailSender>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub extractor: Arc<UrlExtractor>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn ProfileStore>,
    pub history: Arc<dyn HistoryStore>,
    pub billing: Arc<dyn BillingProvider>,
    pub generator: Arc<dyn ContentGenerator>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub extractor: Arc<UrlExtractor>,
    pub profiles: ProfileService,
    pub cache: ContentCache,
    pub ledger: UsageLedger,
    pub entitlements: EntitlementReconciler,
    pub webhooks: Arc<WebhookEventProcessor>,
    pub background: BackgroundTasks,
}

impl AppState {
    /// Create application state backed by Firestore, Stripe, OpenAI and Resend.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let firestore_config = FirestoreConfig::from_env()?;
        let project_id = firestore_config.project_id.clone();
        let firestore = FirestoreClient::new(firestore_config).await?;

        let collaborators = Collaborators {
            profiles: Arc::new(FirestoreProfileStore::new(firestore.clone())),
            cache: Arc::new(FirestoreCacheStore::new(firestore.clone())),
            history: Arc::new(FirestoreHistoryStore::new(firestore)),
            billing: Arc::new(StripeClient::new(config.billing.clone())?),
            generator: Arc::new(OpenAiGenerator::new(config.generation.clone())?),
            email: Arc::new(ResendSender::new(config.email.clone())?),
            identity: Arc::new(JwksVerifier::new(project_id)?),
            extractor: Arc::new(UrlExtractor::new()?),
        };

        Ok(Self::from_parts(config, collaborators))
    }

    /// Wire the services over the given collaborators.
    pub fn from_parts(config: ApiConfig, parts: Collaborators) -> Self {
        let background = BackgroundTasks::default();
        let plans = config.plans.clone();

        let notifier = UsageNotifier::new(
            parts.email,
            background.clone(),
            config.email.app_url.clone(),
        );
        let ledger = UsageLedger::new(parts.profiles.clone(), plans.clone(), notifier);
        let entitlements = EntitlementReconciler::new(
            parts.billing.clone(),
            parts.profiles.clone(),
            plans.clone(),
            background.clone(),
        );
        let webhooks = WebhookEventProcessor::new(
            parts.billing.clone(),
            parts.profiles.clone(),
            plans.clone(),
            config.billing.clone(),
        );

        Self {
            profiles: ProfileService::new(parts.profiles.clone(), plans),
            cache: ContentCache::new(parts.cache, config.cache.clone()),
            store: parts.profiles,
            history: parts.history,
            billing: parts.billing,
            generator: parts.generator,
            identity: parts.identity,
            extractor: parts.extractor,
            ledger,
            entitlements,
            webhooks: Arc::new(webhooks),
            background,
            config,
        }
    }
}
