//! Shared fixtures for the HTTP-level tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::Utc;
use hookory_api::auth::{AuthUser, IdentityVerifier};
use hookory_api::services::email::{EmailError, EmailMessage, EmailSender};
use hookory_api::services::extract::{ExtractorOptions, UrlExtractor};
use hookory_api::services::generation::{ContentGenerator, GenerationError, GenerationRequest};
use hookory_api::{create_router, ApiConfig, ApiError, ApiResult, AppState, Collaborators};
use hookory_billing::fake::FakeBillingProvider;
use hookory_billing::BillingConfig;
use hookory_firestore::memory::{MemoryCacheStore, MemoryHistoryStore, MemoryProfileStore};
use hookory_models::{PlanSettings, UserProfile};
use serde_json::Value;
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Accepts `token-<uid>` bearer tokens for verified users.
pub struct FakeIdentity;

#[async_trait]
impl IdentityVerifier for FakeIdentity {
    async fn verify(&self, token: &str) -> ApiResult<AuthUser> {
        let uid = token
            .strip_prefix("token-")
            .ok_or_else(|| ApiError::unauthorized("Invalid token"))?;
        Ok(AuthUser {
            uid: uid.to_string(),
            email: Some(format!("{}@example.com", uid)),
            email_verified: true,
            name: None,
        })
    }
}

/// Returns a canned post per format and counts calls.
#[derive(Default)]
pub struct ScriptedGenerator {
    calls: AtomicUsize,
    delay: Mutex<Duration>,
}

impl ScriptedGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every generation take `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, GenerationError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{:?} post #{}", request.format, n))
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmail {
    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.subject.clone())
            .collect()
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub profiles: Arc<MemoryProfileStore>,
    pub cache: Arc<MemoryCacheStore>,
    pub history: Arc<MemoryHistoryStore>,
    pub billing: Arc<FakeBillingProvider>,
    pub generator: Arc<ScriptedGenerator>,
    pub email: Arc<RecordingEmail>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(edit: impl FnOnce(&mut ApiConfig)) -> Self {
        let mut config = ApiConfig {
            billing: BillingConfig {
                webhook_secret: Some(WEBHOOK_SECRET.into()),
                price_id_creator: Some("price_creator".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        edit(&mut config);

        let profiles = Arc::new(MemoryProfileStore::new());
        let cache = Arc::new(MemoryCacheStore::new());
        let history = Arc::new(MemoryHistoryStore::new());
        let billing = Arc::new(FakeBillingProvider::new());
        let generator = Arc::new(ScriptedGenerator::default());
        let email = Arc::new(RecordingEmail::default());
        let extractor = UrlExtractor::with_options(ExtractorOptions {
            timeout: Duration::from_secs(5),
            allow_private_hosts: true,
        })
        .unwrap();

        let state = AppState::from_parts(
            config,
            Collaborators {
                profiles: profiles.clone(),
                cache: cache.clone(),
                history: history.clone(),
                billing: billing.clone(),
                generator: generator.clone(),
                email: email.clone(),
                identity: Arc::new(FakeIdentity),
                extractor: Arc::new(extractor),
            },
        );
        let router = create_router(state.clone(), None);

        Self {
            state,
            router,
            profiles,
            cache,
            history,
            billing,
            generator,
            email,
        }
    }

    /// Stored profile for `uid` with a verified email.
    pub fn seed_profile(&self, uid: &str, edit: impl FnOnce(&mut UserProfile)) {
        let mut profile = UserProfile::new(uid, &PlanSettings::default(), Utc::now())
            .with_email(Some(format!("{}@example.com", uid)))
            .with_email_verified(true);
        edit(&mut profile);
        self.profiles.insert(profile);
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn post_json(&self, uid: &str, path: &str, body: Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("authorization", format!("Bearer token-{}", uid))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uid: &str, path: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri(path)
                .header("authorization", format!("Bearer token-{}", uid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
