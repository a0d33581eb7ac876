//! In-memory request telemetry, one set of instruments per connection:
//! a response-time histogram, a score histogram with fixed bucket boundaries,
//! and a request counter broken down by status code. Recorded inside each
//! classifier's critical section, read by the inspection API.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;

use crate::types::Observation;

/// Upper bucket boundaries of the score histogram.
pub const SCORE_BUCKETS: [f64; 11] = [0.01, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

/// Response times above this are clamped before entering the histogram.
const MAX_TRACKED_MS: u64 = 60_000_000;

struct ConnectionTelemetry {
    /// Response times in milliseconds. Tracks 1 ms to ~16 h, 3 significant figures.
    response_time_ms: Mutex<hdrhistogram::Histogram<u64>>,
    score_buckets: [AtomicU64; 11],
    requests_by_status: DashMap<u16, u64>,
    total_requests: AtomicU64,
}

impl ConnectionTelemetry {
    fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, MAX_TRACKED_MS, 3)
            .expect("valid histogram bounds");
        Self {
            response_time_ms: Mutex::new(histogram),
            score_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            requests_by_status: DashMap::new(),
            total_requests: AtomicU64::new(0),
        }
    }

    fn record(&self, obs: Observation, score: f64) {
        let ms = (obs.elapsed_ms.max(0) as u64).min(MAX_TRACKED_MS);
        if let Ok(mut h) = self.response_time_ms.lock() {
            let _ = h.record(ms);
        }

        let bucket = SCORE_BUCKETS
            .iter()
            .position(|&le| score <= le)
            .unwrap_or(SCORE_BUCKETS.len() - 1);
        self.score_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        *self.requests_by_status.entry(obs.status_code).or_insert(0) += 1;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, connection_name: &str) -> TelemetrySnapshot {
        let response_time_ms = {
            let h = self.response_time_ms.lock();
            match h {
                Ok(h) if h.len() > 0 => ResponseTimeSummary {
                    count: h.len(),
                    p50_ms: Some(h.value_at_quantile(0.5)),
                    p95_ms: Some(h.value_at_quantile(0.95)),
                    p99_ms: Some(h.value_at_quantile(0.99)),
                    max_ms: Some(h.max()),
                },
                _ => ResponseTimeSummary::default(),
            }
        };

        let score_histogram = SCORE_BUCKETS
            .iter()
            .zip(&self.score_buckets)
            .map(|(&le, count)| ScoreBucket { le, count: count.load(Ordering::Relaxed) })
            .collect();

        let requests_by_status = self
            .requests_by_status
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();

        TelemetrySnapshot {
            connection_name: connection_name.to_string(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            requests_by_status,
            response_time_ms,
            score_histogram,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TelemetrySnapshot {
    pub connection_name: String,
    pub total_requests: u64,
    pub requests_by_status: BTreeMap<u16, u64>,
    pub response_time_ms: ResponseTimeSummary,
    pub score_histogram: Vec<ScoreBucket>,
}

#[derive(Debug, Default, Serialize)]
pub struct ResponseTimeSummary {
    pub count: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ScoreBucket {
    pub le: f64,
    pub count: u64,
}

/// All instruments, keyed by connection name. Creation is lazy on first record.
#[derive(Default)]
pub struct Telemetry {
    connections: DashMap<String, Arc<ConnectionTelemetry>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one classified request. Callers serialize per connection, so
    /// records for a connection land in classification order.
    pub fn record(&self, connection: &str, obs: Observation, score: f64) {
        let instruments = self
            .connections
            .entry(connection.to_string())
            .or_insert_with(|| Arc::new(ConnectionTelemetry::new()))
            .clone();
        instruments.record(obs, score);
    }

    pub fn snapshot(&self, connection: &str) -> Option<TelemetrySnapshot> {
        let instruments = self.connections.get(connection)?.clone();
        Some(instruments.snapshot(connection))
    }
}
