//! Account and plan summary handlers.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use hookory_models::PlanTier;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Plan and usage summary for the signed-in user.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub plan: PlanTier,
    pub email_verified: bool,
    pub usage_count: u32,
    pub usage_limit_monthly: u32,
    pub usage_reset_at: DateTime<Utc>,
    pub billing_status: Option<String>,
    pub subscription_period_start: Option<DateTime<Utc>>,
    pub subscription_period_end: Option<DateTime<Utc>>,
}

/// GET /api/me
///
/// Runs the lazy usage reset so the returned counters belong to the current
/// period. The plan comes from the local projection.
pub async fn get_me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<MeResponse>> {
    let profile = state.profiles.get_or_create(&user).await?;
    let usage = state.ledger.check_and_reset_usage(&user.uid).await?;
    let plan = profile.effective_plan(Utc::now());

    debug!(
        user_id = %user.uid,
        stored_plan = %profile.plan,
        effective_plan = %plan,
        billing_status = ?profile.billing_status,
        "Account summary"
    );

    Ok(Json(MeResponse {
        plan,
        email_verified: profile.email_verified,
        usage_count: usage.usage_count,
        usage_limit_monthly: state.config.plans.monthly_limit(plan),
        usage_reset_at: usage.usage_reset_at,
        billing_status: profile.billing_status,
        subscription_period_start: profile.subscription_period_start,
        subscription_period_end: profile.subscription_period_end,
    }))
}

/// POST /api/account/delete
///
/// Detaches billing and drops the profile to the free plan.
pub async fn delete_account(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    state.profiles.get_or_create(&user).await?;
    state.profiles.deactivate(&user.uid).await?;
    Ok(Json(json!({ "ok": true })))
}
