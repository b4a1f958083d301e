//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "hookory_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "hookory_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "hookory_http_requests_in_flight";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "hookory_rate_limit_hits_total";

    // Content cache
    pub const CACHE_LOOKUPS_TOTAL: &str = "hookory_cache_lookups_total";
    pub const CACHE_WRITE_FAILURES_TOTAL: &str = "hookory_cache_write_failures_total";

    // Generation
    pub const GENERATIONS_TOTAL: &str = "hookory_generations_total";
    pub const GENERATION_DURATION_SECONDS: &str = "hookory_generation_duration_seconds";

    // Usage metering
    pub const USAGE_INCREMENTS_TOTAL: &str = "hookory_usage_increments_total";
    pub const USAGE_REJECTIONS_TOTAL: &str = "hookory_usage_rejections_total";
    pub const NOTIFICATIONS_TOTAL: &str = "hookory_notifications_total";

    // Entitlement and billing
    pub const ENTITLEMENT_CHECKS_TOTAL: &str = "hookory_entitlement_checks_total";
    pub const WEBHOOK_EVENTS_TOTAL: &str = "hookory_webhook_events_total";

    // Background work
    pub const BACKGROUND_TASKS_TOTAL: &str = "hookory_background_tasks_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Record a cache lookup: `hit`, `miss`, `expired` or `error`.
pub fn record_cache_lookup(outcome: &'static str) {
    counter!(names::CACHE_LOOKUPS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_cache_write_failure() {
    counter!(names::CACHE_WRITE_FAILURES_TOTAL).increment(1);
}

/// Record a generation backend call.
pub fn record_generation(format: &str, outcome: &'static str, duration_secs: f64) {
    let labels = [("format", format.to_string()), ("outcome", outcome.to_string())];
    counter!(names::GENERATIONS_TOTAL, &labels).increment(1);
    histogram!(names::GENERATION_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a committed usage increment.
pub fn record_usage_increment(plan: &str, period_reset: bool) {
    let labels = [
        ("plan", plan.to_string()),
        ("period_reset", period_reset.to_string()),
    ];
    counter!(names::USAGE_INCREMENTS_TOTAL, &labels).increment(1);
}

/// Record a request rejected by cooldown or quota.
pub fn record_usage_rejection(reason: &'static str) {
    counter!(names::USAGE_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

pub fn record_notification(kind: &str, outcome: &'static str) {
    let labels = [("kind", kind.to_string()), ("outcome", outcome.to_string())];
    counter!(names::NOTIFICATIONS_TOTAL, &labels).increment(1);
}

/// Record an authoritative entitlement check: `paid`, `free` or `error`.
pub fn record_entitlement_check(outcome: &'static str) {
    counter!(names::ENTITLEMENT_CHECKS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_webhook_event(event_type: &str, outcome: &'static str) {
    let labels = [
        ("type", event_type.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::WEBHOOK_EVENTS_TOTAL, &labels).increment(1);
}

pub fn record_background_task(task: &'static str, outcome: &'static str) {
    counter!(names::BACKGROUND_TASKS_TOTAL, "task" => task, "outcome" => outcome).increment(1);
}

fn id_segment() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    // History ids are UUIDs; anything else under /jobs/ is still an id.
    RE.get_or_init(|| Regex::new(r"/jobs/[A-Za-z0-9_-]+").ok())
        .as_ref()
}

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    match id_segment() {
        Some(re) => re.replace_all(path, "/jobs/:id").into_owned(),
        None => path.to_string(),
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/jobs/550e8400-e29b-41d4-a716-446655440000"),
            "/api/jobs/:id"
        );
        assert_eq!(sanitize_path("/api/generate"), "/api/generate");
    }
}
