//! Metrics for Agora.
//!
//! Recording goes through the `metrics` facade. No exporter is installed by
//! this crate; without a recorder every call is a no-op, so the helpers are
//! safe to use in tests and libraries.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `agora_requests_total` | Counter | `operation`, `status` | Completed requests |
//! | `agora_request_duration_seconds` | Histogram | `operation` | Request latency |
//! | `agora_errors_total` | Counter | `tier`, `code` | Classified errors |
//! | `agora_connect_attempts_total` | Counter | `outcome` | Datastore connect attempts |
//! | `agora_in_flight_requests` | Gauge | - | Requests being processed |

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Completed requests counter.
pub const REQUESTS_TOTAL: &str = "agora_requests_total";
/// Request latency histogram.
pub const REQUEST_DURATION_SECONDS: &str = "agora_request_duration_seconds";
/// Classified errors counter.
pub const ERRORS_TOTAL: &str = "agora_errors_total";
/// Datastore connection attempts counter.
pub const CONNECT_ATTEMPTS_TOTAL: &str = "agora_connect_attempts_total";
/// In-flight requests gauge.
pub const IN_FLIGHT_REQUESTS: &str = "agora_in_flight_requests";

/// Registers descriptions for all standard metrics with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total number of HTTP requests processed");
    describe_histogram!(REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_counter!(ERRORS_TOTAL, "Errors classified by tier and code");
    describe_counter!(CONNECT_ATTEMPTS_TOTAL, "Datastore connection attempts by outcome");
    describe_gauge!(IN_FLIGHT_REQUESTS, "Number of HTTP requests currently being processed");
}

/// Records a completed request.
///
/// Requests that matched no operation are labelled `unmatched`.
pub fn record_request(operation: Option<&str>, status_code: u16, duration: Duration) {
    let operation = operation.unwrap_or("unmatched").to_string();
    counter!(
        REQUESTS_TOTAL,
        "operation" => operation.clone(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(REQUEST_DURATION_SECONDS, "operation" => operation).record(duration.as_secs_f64());
}

/// Records a classified error.
pub fn record_error(tier: &'static str, code: &str) {
    counter!(ERRORS_TOTAL, "tier" => tier, "code" => code.to_string()).increment(1);
}

/// Records a datastore connection attempt.
pub fn record_connect_attempt(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(CONNECT_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Guard that tracks an in-flight request until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_without_recorder() {
        describe_metrics();
        record_request(Some("getItem"), 200, Duration::from_millis(10));
        record_request(None, 404, Duration::from_millis(1));
        record_error("protocol", "ROUTE_NOT_FOUND");
        record_connect_attempt(false);
        record_connect_attempt(true);
    }

    #[test]
    fn test_in_flight_guard() {
        let guard = InFlightGuard::new();
        drop(guard);
    }
}
