//! Store metrics.
//!
//! - Firestore request counters and latency by operation and status
//! - Retry counters
//! - Ledger write conflicts (optimistic-lock losses)

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total Firestore requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "firestore_requests_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "firestore_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "firestore_latency_seconds";

    /// Ledger writes that lost an optimistic-concurrency race.
    pub const LEDGER_CONFLICTS_TOTAL: &str = "ledger_write_conflicts_total";
}

/// Record metrics for a completed Firestore request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a lost optimistic-concurrency race on a ledger write.
pub fn record_conflict(operation: &str) {
    counter!(
        names::LEDGER_CONFLICTS_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}
