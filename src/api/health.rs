//! Shared health state for the /health endpoint.
//! Updated by the probe driver, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Default)]
pub struct HealthState {
    /// Completed probe rounds since process start.
    pub probe_rounds: AtomicU64,
    /// Requests that came back with a response (any status).
    pub requests_completed: AtomicU64,
    /// Nanosecond timestamp of the last completed request (0 = none).
    pub last_request_at_ns: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_round(&self) {
        self.probe_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_request(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
        self.last_request_at_ns.store(now_ns(), Ordering::Relaxed);
    }

    pub fn probe_rounds(&self) -> u64 {
        self.probe_rounds.load(Ordering::Relaxed)
    }

    pub fn requests_completed(&self) -> u64 {
        self.requests_completed.load(Ordering::Relaxed)
    }

    pub fn last_request_at_ns(&self) -> u64 {
        self.last_request_at_ns.load(Ordering::Relaxed)
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
