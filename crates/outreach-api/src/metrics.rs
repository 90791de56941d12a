//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use outreach_models::{Credits, OperationKind};

/// Install the Prometheus recorder and return the render handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "outreach_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "outreach_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "outreach_http_requests_in_flight";

    // Hold lifecycle
    pub const HOLDS_CREATED_TOTAL: &str = "outreach_holds_created_total";
    pub const HOLDS_RELEASED_TOTAL: &str = "outreach_holds_released_total";
    pub const HOLDS_SWEPT_TOTAL: &str = "outreach_holds_swept_total";
    pub const HOLDS_OUTSTANDING: &str = "outreach_holds_outstanding";
    pub const HOLD_REJECTIONS_TOTAL: &str = "outreach_hold_rejections_total";

    // Ledger
    pub const DEDUCTIONS_TOTAL: &str = "outreach_credit_deductions_total";
    pub const CREDITS_DEDUCTED_MINOR_TOTAL: &str = "outreach_credits_deducted_minor_total";
    pub const RESETS_TOTAL: &str = "outreach_credit_resets_total";
    pub const ALLOWANCES_TOTAL: &str = "outreach_credit_allowances_total";

    // Paid operations
    pub const OPERATIONS_TOTAL: &str = "outreach_operations_total";
    pub const OPERATION_DURATION_SECONDS: &str = "outreach_operation_duration_seconds";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "outreach_rate_limit_hits_total";
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

pub fn record_hold_created(operation: OperationKind) {
    counter!(names::HOLDS_CREATED_TOTAL, "operation" => operation.as_str()).increment(1);
}

pub fn record_hold_released(reason: &'static str) {
    counter!(names::HOLDS_RELEASED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_holds_swept(count: usize) {
    counter!(names::HOLDS_SWEPT_TOTAL).increment(count as u64);
}

pub fn set_holds_outstanding(count: usize) {
    gauge!(names::HOLDS_OUTSTANDING).set(count as f64);
}

/// Record a refused hold (`insufficient` or `conflict`).
pub fn record_hold_rejected(reason: &'static str) {
    counter!(names::HOLD_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

pub fn record_deduction(operation: OperationKind, amount: Credits) {
    counter!(names::DEDUCTIONS_TOTAL, "operation" => operation.as_str()).increment(1);
    counter!(names::CREDITS_DEDUCTED_MINOR_TOTAL, "operation" => operation.as_str())
        .increment(amount.minor().max(0) as u64);
}

pub fn record_reset(applied: bool) {
    let outcome = if applied { "applied" } else { "skipped" };
    counter!(names::RESETS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_allowance(plan_code: &str) {
    counter!(names::ALLOWANCES_TOTAL, "plan" => plan_code.to_string()).increment(1);
}

/// Record a finished paid operation.
///
/// `outcome` is one of `charged`, `provider_failed`, `timeout`, `rejected`,
/// `deduct_failed`.
pub fn record_operation(operation: OperationKind, outcome: &'static str, duration_secs: f64) {
    let labels = [
        ("operation", operation.as_str().to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::OPERATIONS_TOTAL, &labels).increment(1);
    histogram!(names::OPERATION_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Collapse user ids in paths so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let mut out = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let under_internal_credits =
            i >= 3 && segments[i - 2] == "internal" && segments[i - 1] == "credits";
        if under_internal_credits && !segment.is_empty() {
            out.push(":uid");
        } else {
            out.push(*segment);
        }
    }
    out.join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/internal/credits/abcDEF123/reset-free"),
            "/internal/credits/:uid/reset-free"
        );
        assert_eq!(sanitize_path("/api/credits/history"), "/api/credits/history");
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
