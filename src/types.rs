use serde::Serialize;

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// One completed outbound HTTP round trip, as seen by the interceptor.
/// Created per request, consumed by a single classify call.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Observation {
    /// Wall-clock milliseconds for the round trip. Negative values are clamped
    /// to zero before they reach the estimator or the score formula.
    pub elapsed_ms: i64,
    pub status_code: u16,
}

impl Observation {
    pub fn new(elapsed_ms: i64, status_code: u16) -> Self {
        Self { elapsed_ms, status_code }
    }

    /// Whether this response short-circuits scoring. 5xx always does; 4xx only
    /// when the connection's policy says so.
    pub fn is_error(&self, include_4xx: bool) -> bool {
        self.status_code >= 500 || (include_4xx && self.status_code >= 400)
    }
}

// ---------------------------------------------------------------------------
// Classifier configuration
// ---------------------------------------------------------------------------

/// Per-connection scoring knobs. Fixed once the connection's classifier is
/// created; later dispatches with a different config are ignored.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClassifierConfig {
    /// Multiplier on the blended p95 to obtain the acceptable ceiling.
    pub max_percentile_mult: f64,
    /// Hard cap on the ceiling in milliseconds. Negative means unbounded.
    pub max_absolute_time_ms: i64,
    /// Treat 4xx responses as errors for scoring.
    pub include_4xx: bool,
    /// Observations per window before rollover. Must be positive.
    pub window_size: i64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_percentile_mult: 1.5,
            max_absolute_time_ms: 1000,
            include_4xx: false,
            window_size: 1000,
        }
    }
}
