//! Metrics recorded by the authenticated client
//!
//! - `auth_refresh_total` (counter): label `outcome` (`success`, `failure`, `reused`, `discarded`)
//! - `auth_refresh_waiters_total` (counter): requests that joined an in-flight refresh
//! - `auth_retries_total` (counter): label `outcome` of the single retry
//! - `auth_teardowns_total` (counter): terminal session teardowns
//!
//! Without an installed recorder these are no-ops.

/// Record the outcome of a refresh cycle.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a request that queued behind an in-flight refresh instead of starting one.
pub fn record_refresh_waiter() {
    metrics::counter!("auth_refresh_waiters_total").increment(1);
}

/// Record the result of the one retry after a refresh.
pub fn record_retry(outcome: &'static str) {
    metrics::counter!("auth_retries_total", "outcome" => outcome).increment(1);
}

pub fn record_teardown() {
    metrics::counter!("auth_teardowns_total").increment(1);
}
