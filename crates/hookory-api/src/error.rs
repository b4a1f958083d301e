//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use hookory_billing::BillingError;
use hookory_firestore::FirestoreError;

use crate::services::generation::GenerationError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limited")]
    RateLimited,

    /// Generation attempted inside the plan's cooldown window.
    #[error("Cooldown active")]
    CooldownActive { seconds_remaining: u64 },

    /// Monthly generation quota used up.
    #[error("Monthly limit reached. Upgrade to increase your limit.")]
    QuotaExceeded,

    /// Feature reserved for paid plans.
    #[error("{0}")]
    PlanRequired(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn plan_required(msg: impl Into<String>) -> Self {
        Self::PlanRequired(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) | ApiError::PlanRequired(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::Firestore(FirestoreError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited | ApiError::CooldownActive { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::QuotaExceeded => StatusCode::PAYMENT_REQUIRED,
            ApiError::Internal(_)
            | ApiError::Generation(_)
            | ApiError::Billing(_)
            | ApiError::Firestore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let message = if self.is_internal()
            && std::env::var("ENVIRONMENT")
                .map(|e| e.eq_ignore_ascii_case("production"))
                .unwrap_or(false)
        {
            match &self {
                ApiError::Generation(_) => "AI generation failed.".to_string(),
                _ => "An internal error occurred".to_string(),
            }
        } else {
            self.to_string()
        };

        let body = match &self {
            ApiError::CooldownActive { seconds_remaining } => json!({
                "error": message,
                "secondsRemaining": seconds_remaining,
            }),
            ApiError::QuotaExceeded => json!({
                "error": message,
                "upgradeRequired": true,
            }),
            ApiError::PlanRequired(_) => json!({
                "error": message,
                "plan": "free",
            }),
            _ => json!({ "error": message }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_cooldown_body_carries_seconds() {
        let (status, body) = body_json(ApiError::CooldownActive {
            seconds_remaining: 35,
        })
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["secondsRemaining"], 35);
    }

    #[tokio::test]
    async fn test_quota_body_requests_upgrade() {
        let (status, body) = body_json(ApiError::QuotaExceeded).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["upgradeRequired"], true);
    }

    #[tokio::test]
    async fn test_plan_required_is_forbidden() {
        let (status, body) =
            body_json(ApiError::plan_required("History is available on the Creator plan.")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["plan"], "free");
        assert_eq!(body["error"], "History is available on the Creator plan.");
    }

    #[test]
    fn test_upstream_errors_are_500() {
        let err = ApiError::from(BillingError::NotConfigured("STRIPE_SECRET_KEY"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let err = ApiError::from(FirestoreError::Contention(5));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
