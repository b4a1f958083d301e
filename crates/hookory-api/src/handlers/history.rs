//! Saved generation history. Creator plan only.
//!
//! Every handler asks the billing provider first; the local plan field is not
//! trusted for these routes.

use axum::extract::{Path, State};
use axum::Json;
use hookory_models::{HistoryEntry, HistoryId, HistorySummary, PlanTier};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Entries fetched before sorting.
const HISTORY_FETCH_LIMIT: u32 = 100;
/// Entries returned to the client.
const HISTORY_PAGE_SIZE: usize = 30;

const HISTORY_DENIED: &str = "History is available on the Creator plan.";

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryListResponse {
    pub plan: PlanTier,
    pub jobs: Vec<HistorySummary>,
}

async fn require_creator(state: &AppState, user: &AuthUser) -> ApiResult<()> {
    let profile = state.profiles.get_or_create(user).await?;
    state
        .entitlements
        .require_paid_access(&profile, HISTORY_DENIED)
        .await?;
    Ok(())
}

async fn load_owned(state: &AppState, user: &AuthUser, id: &str) -> ApiResult<HistoryEntry> {
    let entry = state
        .history
        .get(&HistoryId::from_string(id))
        .await?
        .ok_or_else(|| ApiError::not_found("history entry"))?;
    if !entry.is_owned_by(&user.uid) {
        return Err(ApiError::forbidden("history entry belongs to another user"));
    }
    Ok(entry)
}

/// GET /api/jobs
pub async fn list_history(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<HistoryListResponse>> {
    require_creator(&state, &user).await?;

    let mut entries = state
        .history
        .list_for_user(&user.uid, HISTORY_FETCH_LIMIT)
        .await?;
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let jobs = entries
        .iter()
        .take(HISTORY_PAGE_SIZE)
        .map(HistoryEntry::summary)
        .collect();

    Ok(Json(HistoryListResponse {
        plan: PlanTier::Creator,
        jobs,
    }))
}

/// GET /api/jobs/:id
pub async fn get_history_entry(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<HistoryEntry>> {
    require_creator(&state, &user).await?;
    Ok(Json(load_owned(&state, &user, &id).await?))
}

/// DELETE /api/jobs/:id
pub async fn delete_history_entry(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_creator(&state, &user).await?;
    let entry = load_owned(&state, &user, &id).await?;
    state.history.delete(&entry.id).await?;
    info!(user_id = %user.uid, job_id = %entry.id, "Deleted history entry");
    Ok(Json(json!({ "ok": true })))
}
