//! Metrics instrumentation for onedari.
//!
//! All metrics are prefixed with `onedari.`

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Outcome of a DNS query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// Answered with NOERROR.
    Success,
    /// Name does not exist, or the query shape is not served.
    NxDomain,
    /// Registry unreachable or returned something unusable.
    ServFail,
}

impl QueryResult {
    fn as_str(self) -> &'static str {
        match self {
            QueryResult::Success => "success",
            QueryResult::NxDomain => "nxdomain",
            QueryResult::ServFail => "servfail",
        }
    }
}

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: Duration) {
    counter!("onedari.dns.query.count", "type" => record_type.to_string(), "result" => result.as_str())
        .increment(1);
    histogram!("onedari.dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Record the number of answers in a successful reply.
pub fn record_answers_returned(record_type: &str, count: usize) {
    histogram!("onedari.dns.query.answers", "type" => record_type.to_string()).record(count as f64);
}

/// Record answers dropped by the per-response cap.
pub fn record_answers_capped(record_type: &str, dropped: usize) {
    counter!("onedari.dns.query.capped", "type" => record_type.to_string())
        .increment(dropped as u64);
}

/// Record a registry HTTP request.
pub fn record_api_request(method: &str, route: &str, status: u16) {
    counter!(
        "onedari.api.request.count",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a store operation.
pub fn record_store_op(op: &'static str, outcome: &'static str, duration: Duration) {
    counter!("onedari.store.op.count", "op" => op, "outcome" => outcome).increment(1);
    histogram!("onedari.store.op.duration.seconds", "op" => op).record(duration.as_secs_f64());
}

/// Outcome of one announce tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceResult {
    /// Instance was written to the registry.
    Announced,
    /// Liveness check failed; nothing was sent.
    CheckFailed,
    /// The registry rejected the write or was unreachable.
    Error,
}

/// Record an announce tick.
pub fn record_announce(app: &str, result: AnnounceResult) {
    let result_str = match result {
        AnnounceResult::Announced => "announced",
        AnnounceResult::CheckFailed => "check_failed",
        AnnounceResult::Error => "error",
    };
    counter!("onedari.announce.tick.count", "app" => app.to_string(), "result" => result_str)
        .increment(1);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
