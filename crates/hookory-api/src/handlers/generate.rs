//! Content generation handler.

use std::collections::BTreeMap;

use tokio::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use hookory_models::{
    GenerationContext, HistoryEntry, InputType, OutputFormat, PlanTier, ResolvedContext,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::sanitize_input;
use crate::services::cache::{compute_key, StyleFlags};
use crate::services::generation::{generate_with_deadline, GenerationError, GenerationRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub input_type: InputType,
    pub input_text: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub context: GenerationContext,
    #[serde(default)]
    pub formats: Vec<OutputFormat>,
    #[serde(default)]
    pub regenerate: bool,
    #[serde(default)]
    pub save_history: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub outputs: BTreeMap<OutputFormat, String>,
    pub from_cache: BTreeMap<OutputFormat, bool>,
}

/// Everything the billable section needs, owned so it can outlive the request.
struct BillableJob {
    uid: String,
    input_text: String,
    context: GenerationContext,
    resolved: ResolvedContext,
    formats: Vec<OutputFormat>,
    regenerate: bool,
    save_history: bool,
    max_input_chars: usize,
}

/// POST /api/generate
pub async fn generate(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<Json<GenerateResponse>> {
    let profile = state.profiles.get_or_create(&user).await?;

    if !profile.email_verified {
        return Err(ApiError::forbidden(
            "Email not verified. Please verify your email to generate.",
        ));
    }

    let Json(request) = body.map_err(|e| ApiError::bad_request(format!("Invalid JSON: {}", e.body_text())))?;

    let mut formats = Vec::with_capacity(request.formats.len());
    for format in request.formats {
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    if formats.is_empty() {
        return Err(ApiError::bad_request("At least one format must be selected."));
    }

    // Fast-path plan from the local projection.
    let now = Utc::now();
    let is_paid = profile.has_cached_paid_access(now);
    let plan = PlanTier::from_access(is_paid);
    if !is_paid {
        if request.input_type == InputType::Url {
            return Err(ApiError::plan_required(
                "URL input is available on the Creator plan. Upgrade to unlock.",
            ));
        }
        if request.regenerate {
            return Err(ApiError::plan_required(
                "Regenerate is available on the Creator plan. Upgrade to unlock.",
            ));
        }
    }

    let cooldown = state.ledger.cooldown_for(&profile, now);
    if !cooldown.allowed {
        metrics::record_usage_rejection("cooldown");
        return Err(ApiError::CooldownActive {
            seconds_remaining: cooldown.seconds_remaining,
        });
    }

    let usage = state.ledger.check_and_reset_usage(&user.uid).await?;
    state.ledger.ensure_quota(&usage)?;

    let plans = &state.config.plans;
    let max_input_chars = plans.max_input_chars(plan);
    let input_text = match request.input_type {
        InputType::Url => {
            let url = request
                .url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| ApiError::bad_request("URL is required."))?;
            state.extractor.extract(url).await.map_err(|e| {
                warn!(user_id = %user.uid, error = %e, "URL extraction failed");
                ApiError::bad_request(e.to_string())
            })?
        }
        InputType::Text => {
            let text = sanitize_input(request.input_text.as_deref().unwrap_or_default());
            if text.trim().is_empty() {
                return Err(ApiError::bad_request("Input text is required."));
            }
            if text.chars().count() > max_input_chars {
                return Err(ApiError::bad_request(format!(
                    "Input too long. Maximum {} characters for {} plan. Upgrade to Creator plan for {} characters.",
                    max_input_chars,
                    plan.label(),
                    plans.max_input_chars(PlanTier::Creator),
                )));
            }
            text
        }
    };

    let job = BillableJob {
        uid: user.uid.clone(),
        input_text,
        resolved: request.context.resolve(),
        context: request.context,
        formats,
        regenerate: request.regenerate,
        save_history: is_paid && request.save_history,
        max_input_chars,
    };

    // A client disconnect drops this future, not the spawned task, so a
    // finished generation is always charged exactly once.
    let response = tokio::spawn(run_billable(state, job))
        .await
        .map_err(|e| ApiError::internal(format!("Generation task failed: {}", e)))??;

    Ok(Json(response))
}

async fn run_billable(state: AppState, job: BillableJob) -> ApiResult<GenerateResponse> {
    let flags = StyleFlags::from(&job.resolved);
    // One budget for all formats; nothing is charged once it runs out.
    let budget = state.config.generation.timeout;
    let deadline = Instant::now() + budget;
    let mut outputs = BTreeMap::new();
    let mut from_cache = BTreeMap::new();

    for &format in &job.formats {
        let key = compute_key(&job.input_text, &job.resolved, format, flags);

        if !job.regenerate {
            if let Some(text) = state.cache.get(&key).await {
                outputs.insert(format, text);
                from_cache.insert(format, true);
                continue;
            }
        }

        let request = GenerationRequest {
            format,
            text: &job.input_text,
            context: &job.resolved,
            regenerate: job.regenerate,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(GenerationError::Timeout(budget.as_secs()).into());
        }
        let text = generate_with_deadline(state.generator.as_ref(), request, remaining).await?;
        state.cache.put(&key, &text, state.generator.provider()).await;
        outputs.insert(format, text);
        from_cache.insert(format, false);
    }

    // One generate action counts once, however many formats it produced.
    let outcome = state.ledger.increment(&job.uid, 1).await?;
    info!(
        user_id = %job.uid,
        formats = job.formats.len(),
        cached = from_cache.values().filter(|hit| **hit).count(),
        usage_count = outcome.usage.usage_count,
        "Generation completed"
    );

    if job.save_history {
        let stored_input: String = job.input_text.chars().take(job.max_input_chars).collect();
        let entry = HistoryEntry::new(
            &job.uid,
            stored_input,
            job.context,
            job.formats,
            outputs.clone(),
            Utc::now(),
        );
        if let Err(e) = state.history.save(&entry).await {
            warn!(user_id = %job.uid, error = %e, "Failed to save generation history");
        }
    }

    Ok(GenerateResponse { outputs, from_cache })
}
