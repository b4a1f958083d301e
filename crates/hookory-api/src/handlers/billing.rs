//! Billing handlers: checkout, portal, manual sync and the provider webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hookory_billing::{CreateCheckoutParams, CreateCustomerParams, SIGNATURE_HEADER};
use hookory_firestore::ProfilePatch;
use hookory_models::{PlanTier, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::webhook::WebhookError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct RedirectResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingStatusResponse {
    pub customer_id: Option<String>,
    pub effective_plan: PlanTier,
    pub subscription_status: SubscriptionStatus,
}

/// Base URL for return links: the caller's `Origin`, else the configured app URL.
fn return_base(headers: &HeaderMap, state: &AppState) -> String {
    headers
        .get("origin")
        .and_then(|v| v.to_str().ok())
        .filter(|o| !o.is_empty())
        .unwrap_or(state.config.app_url.as_str())
        .trim_end_matches('/')
        .to_string()
}

/// POST /api/billing/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    user: AuthUser,
) -> ApiResult<Json<RedirectResponse>> {
    let profile = state.profiles.get_or_create(&user).await?;

    let customer_id = match profile.billing_customer_id {
        Some(id) => id,
        None => {
            let customer = state
                .billing
                .create_customer(CreateCustomerParams {
                    email: profile.email.as_deref(),
                    name: profile.display_name.as_deref(),
                    user_id: &user.uid,
                })
                .await?;
            let patch = ProfilePatch {
                billing_customer_id: Some(Some(customer.id.clone())),
                ..Default::default()
            };
            state.store.update_profile(&user.uid, &patch, None).await?;
            info!(user_id = %user.uid, customer_id = %customer.id, "Created billing customer");
            customer.id
        }
    };

    let base = return_base(&headers, &state);
    let success_url = format!("{}/usage?session_id={{CHECKOUT_SESSION_ID}}", base);
    let cancel_url = format!("{}/usage", base);
    let session = state
        .billing
        .create_checkout_session(CreateCheckoutParams {
            customer_id: &customer_id,
            user_id: &user.uid,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await?;

    let url = session
        .url
        .ok_or_else(|| ApiError::internal("Checkout session has no URL"))?;
    Ok(Json(RedirectResponse { url }))
}

/// POST /api/billing/portal
pub async fn create_portal(
    State(state): State<AppState>,
    headers: HeaderMap,
    user: AuthUser,
) -> ApiResult<Json<RedirectResponse>> {
    let profile = state.profiles.get_or_create(&user).await?;
    let customer_id = profile
        .billing_customer_id
        .ok_or_else(|| ApiError::bad_request("No billing customer found for this user."))?;

    let return_url = format!("{}/usage", return_base(&headers, &state));
    let session = state
        .billing
        .create_portal_session(&customer_id, &return_url)
        .await?;
    Ok(Json(RedirectResponse { url: session.url }))
}

/// POST /api/billing/sync
///
/// Authoritative check with a synchronous write-back.
pub async fn sync_billing(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<SubscriptionStatus>> {
    let profile = state.profiles.get_or_create(&user).await?;
    let customer_id = profile
        .billing_customer_id
        .ok_or_else(|| ApiError::bad_request("No billing customer found. Please upgrade first."))?;

    let status = state
        .entitlements
        .check_provider_status(Some(&customer_id))
        .await?;
    state
        .entitlements
        .sync_to_profile_store(&user.uid, &status)
        .await?;

    info!(
        user_id = %user.uid,
        customer_id = %customer_id,
        has_access = status.has_access,
        "Billing state synced"
    );
    Ok(Json(status))
}

/// GET /api/billing/status
///
/// Read-only view of what the provider currently reports.
pub async fn billing_status(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<BillingStatusResponse>> {
    let profile = state.profiles.get_or_create(&user).await?;
    let status = state
        .entitlements
        .check_provider_status(profile.billing_customer_id.as_deref())
        .await?;

    Ok(Json(BillingStatusResponse {
        customer_id: profile.billing_customer_id,
        effective_plan: status.plan(),
        subscription_status: status,
    }))
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WebhookError::NotConfigured => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            WebhookError::Verification(e) => {
                (StatusCode::BAD_REQUEST, format!("Webhook Error: {}", e))
            }
            WebhookError::Handler(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Webhook handler error".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// POST /api/billing/webhook
///
/// 200 once handled or deliberately ignored; anything else asks the provider
/// to redeliver.
pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WebhookError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let event = state.webhooks.verify(&body, signature).map_err(|e| {
        warn!(error = %e, "Rejected billing webhook");
        e
    })?;
    state.webhooks.process(&event).await?;

    Ok(Json(json!({ "received": true })))
}
