//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::account::{delete_account, get_me};
use crate::handlers::billing::{
    billing_status, billing_webhook, create_checkout, create_portal, sync_billing,
};
use crate::handlers::generate::generate;
use crate::handlers::history::{delete_history_entry, get_history_entry, list_history};
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    IpRateLimiter,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let account_routes = Router::new()
        .route("/me", get(get_me))
        .route("/account/delete", post(delete_account));

    let history_routes = Router::new()
        .route("/jobs", get(list_history))
        .route(
            "/jobs/:id",
            get(get_history_entry).delete(delete_history_entry),
        );

    let billing_routes = Router::new()
        .route("/billing/checkout", post(create_checkout))
        .route("/billing/portal", post(create_portal))
        .route("/billing/sync", post(sync_billing))
        .route("/billing/status", get(billing_status));

    let rate_limiter = IpRateLimiter::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    );

    let api_routes = Router::new()
        .merge(account_routes)
        .merge(history_routes)
        .merge(billing_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter.clone(),
            rate_limit_middleware,
        ));

    // Bounded by the generation deadline rather than the request timeout.
    let generate_routes = Router::new()
        .route("/api/generate", post(generate))
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    // Provider retries must never be throttled.
    let webhook_routes = Router::new().route("/billing/webhook", post(billing_webhook));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    let timed_routes = Router::new()
        .nest("/api", api_routes.merge(webhook_routes))
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(TimeoutLayer::new(state.config.request_timeout));

    Router::new()
        .merge(timed_routes)
        .merge(generate_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
