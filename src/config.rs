use crate::error::{AppError, Result};
use crate::types::ClassifierConfig;

/// Quantile tracked per connection. The schema provisions one snapshot-pointer
/// column per tracked quantile; only this one exists today.
pub const SCORE_QUANTILE: f64 = 0.95;

/// Ceiling used when `max_absolute_time_ms` is configured negative.
pub const UNBOUNDED_TIME_MS: i64 = 10_000_000_000;

/// SQLite busy timeout in milliseconds.
pub const DB_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Named upstreams probed by the demo driver (PROBE_TARGETS, comma-separated
    /// `name=url` pairs). Empty means the driver stays idle.
    pub probe_targets: Vec<ProbeTarget>,
    /// Seconds between probe rounds (PROBE_INTERVAL_SECS).
    pub probe_interval_secs: u64,
    /// Classifier defaults applied to connections first seen by the interceptor.
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub name: String,
    pub url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let classifier = ClassifierConfig {
            max_percentile_mult: parse_env("MAX_PERCENTILE_MULT", 1.5)?,
            include_4xx: parse_env("INCLUDE_4XX", false)?,
            window_size: parse_env("WINDOW_SIZE", 1000)?,
            max_absolute_time_ms: parse_env("MAX_ABSOLUTE_TIME_MS", 1000)?,
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "pulse.db".to_string()),
            api_port: parse_env("API_PORT", 3000u16)?,
            probe_targets: parse_targets(&std::env::var("PROBE_TARGETS").unwrap_or_default())?,
            probe_interval_secs: parse_env("PROBE_INTERVAL_SECS", 1)?,
            classifier,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}

/// Parses `name=url,name=url` into probe targets. Empty entries are skipped.
fn parse_targets(raw: &str) -> Result<Vec<ProbeTarget>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, url)) if !name.is_empty() && !url.is_empty() => Ok(ProbeTarget {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            }),
            _ => Err(AppError::Config(format!(
                "PROBE_TARGETS entry {entry:?} is not name=url"
            ))),
        })
        .collect()
}
