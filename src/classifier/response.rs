//! Per-connection response classification.
//!
//! Each classifier maps observations for one upstream connection to a health
//! score in [0,1]. The acceptable ceiling is derived from a streaming p95
//! estimate, blended between the previous and the current window so the
//! estimate neither jumps at rollover nor goes stale. Calls are serialized by
//! an exclusive lock held from observation intake to the end of persistence.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::classifier::smoother::ScoreSmoother;
use crate::config::{SCORE_QUANTILE, UNBOUNDED_TIME_MS};
use crate::db::store::PsqrStore;
use crate::error::{AppError, Result};
use crate::psqr::Psqr;
use crate::telemetry::Telemetry;
use crate::types::{ClassifierConfig, Observation};

pub struct ResponseClassifier {
    name: String,
    cfg: ClassifierConfig,
    store: PsqrStore,
    telemetry: Arc<Telemetry>,
    state: Mutex<ClassifierState>,
}

struct ClassifierState {
    last_observation: Option<Observation>,
    current_score: f64,
    smoother: ScoreSmoother,
}

impl ResponseClassifier {
    /// A negative `max_absolute_time_ms` is normalized to an effectively
    /// unbounded ceiling. A non-positive `window_size` is rejected.
    pub fn new(
        name: &str,
        mut cfg: ClassifierConfig,
        store: PsqrStore,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        if cfg.window_size <= 0 {
            return Err(AppError::Config(format!(
                "window_size must be positive, got {}",
                cfg.window_size
            )));
        }
        if cfg.max_absolute_time_ms < 0 {
            cfg.max_absolute_time_ms = UNBOUNDED_TIME_MS;
        }

        Ok(Self {
            name: name.to_string(),
            cfg,
            store,
            telemetry,
            state: Mutex::new(ClassifierState {
                last_observation: None,
                current_score: 1.0,
                smoother: ScoreSmoother::new(),
            }),
        })
    }

    /// Scores one observation. Serialized per classifier; concurrent calls for
    /// the same connection queue on the state lock. A repository error aborts
    /// the call without applying the observation.
    pub async fn classify(&self, obs: Observation) -> Result<f64> {
        let mut state = self.state.lock().await;
        state.last_observation = Some(obs);

        // Error responses pin the score to zero and bypass the estimator. The
        // zero still enters the smoother ring so following scores feel it.
        if obs.is_error(self.cfg.include_4xx) {
            state.smoother.push(0.0);
            state.current_score = 0.0;
            debug!(connection = %self.name, code = obs.status_code, "error response scored 0");
            self.telemetry.record(&self.name, obs, 0.0);
            return Ok(0.0);
        }

        let elapsed = obs.elapsed_ms.max(0) as f64;

        let (previous_id, mut psqr) = match self.store.load_current(&self.name, SCORE_QUANTILE).await? {
            Some(rec) => (rec.previous_id, rec.psqr),
            None => (None, Psqr::new(SCORE_QUANTILE)?),
        };

        // Blend the previous window's final estimate with the current running
        // one, shifting weight toward the current window as it fills.
        let mut percentile = psqr.get();
        let mut blended = false;
        if let Some(prev_id) = previous_id {
            if let Some(prev) = self.store.load_by_id(prev_id).await? {
                let w2 = ((psqr.count() % self.cfg.window_size) + 1) as f64
                    / self.cfg.window_size as f64;
                percentile = (1.0 - w2) * prev.psqr.get() + w2 * percentile;
                blended = true;
            }
        }

        let raw = if blended || psqr.count() > 5 {
            let upper = (self.cfg.max_percentile_mult * percentile)
                .min(self.cfg.max_absolute_time_ms as f64);
            score_against_ceiling(elapsed, upper)
        } else {
            1.0
        };

        let score = state.smoother.push(raw);
        state.current_score = score;

        if (psqr.count() + 1) % self.cfg.window_size == 0 {
            self.store.roll_window(&self.name, SCORE_QUANTILE).await?;
            psqr.reset();
            debug!(connection = %self.name, "window rolled");
        }

        psqr.add(elapsed);
        self.store.upsert_current(&self.name, SCORE_QUANTILE, &psqr).await?;

        self.telemetry.record(&self.name, obs, score);
        Ok(score)
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.cfg
    }

    pub async fn score(&self) -> f64 {
        self.state.lock().await.current_score
    }

    pub async fn last_observation(&self) -> Option<Observation> {
        self.state.lock().await.last_observation
    }
}

/// Maps a response time onto [0,1] against the acceptable ceiling: 1 as
/// `elapsed` approaches 0, 0.5 at the ceiling, toward 0 far beyond it.
fn score_against_ceiling(elapsed: f64, upper: f64) -> f64 {
    let denom = upper.max(elapsed);
    if denom <= 0.0 {
        return 1.0;
    }
    (upper - elapsed) / denom * 0.5 + 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::test_pool;

    const TEST_CFG: ClassifierConfig = ClassifierConfig {
        max_percentile_mult: 1.0,
        max_absolute_time_ms: 10_000,
        include_4xx: true,
        window_size: 100,
    };

    async fn classifier_with(cfg: ClassifierConfig) -> (ResponseClassifier, PsqrStore) {
        let store = PsqrStore::new(test_pool().await);
        let telemetry = Arc::new(Telemetry::new());
        let classifier =
            ResponseClassifier::new("edge", cfg, store.clone(), telemetry).unwrap();
        (classifier, store)
    }

    async fn feed(classifier: &ResponseClassifier, elapsed_ms: i64, n: usize) {
        for _ in 0..n {
            classifier.classify(Observation::new(elapsed_ms, 200)).await.unwrap();
        }
    }

    #[test]
    fn ceiling_score_shape() {
        assert_eq!(score_against_ceiling(0.0, 100.0), 1.0);
        assert_eq!(score_against_ceiling(100.0, 100.0), 0.5);
        assert!(score_against_ceiling(10_000.0, 100.0) < 0.05);
        // Monotone non-increasing in elapsed.
        let mut last = 1.0;
        for t in 0..200 {
            let s = score_against_ceiling(t as f64 * 10.0, 100.0);
            assert!(s <= last + 1e-12);
            last = s;
        }
    }

    #[tokio::test]
    async fn rejects_non_positive_window() {
        let cfg = ClassifierConfig { window_size: 0, ..TEST_CFG };
        let store = PsqrStore::new(test_pool().await);
        assert!(ResponseClassifier::new("edge", cfg, store, Arc::new(Telemetry::new())).is_err());
    }

    #[tokio::test]
    async fn unbounded_ceiling_replaces_negative_cap() {
        let cfg = ClassifierConfig { max_absolute_time_ms: -1, ..TEST_CFG };
        let (classifier, _) = classifier_with(cfg).await;
        assert_eq!(classifier.config().max_absolute_time_ms, UNBOUNDED_TIME_MS);
    }

    #[tokio::test]
    async fn cold_start_scores_one() {
        let (classifier, _) = classifier_with(TEST_CFG).await;
        let score = classifier.classify(Observation::new(50, 200)).await.unwrap();
        assert_eq!(score, 1.0);
    }

    #[tokio::test]
    async fn server_error_scores_zero_and_skips_the_estimator() {
        let (classifier, store) = classifier_with(TEST_CFG).await;
        let score = classifier.classify(Observation::new(10, 503)).await.unwrap();

        assert_eq!(score, 0.0);
        assert!(store.load_current("edge", SCORE_QUANTILE).await.unwrap().is_none());
        assert_eq!(classifier.score().await, 0.0);
    }

    #[tokio::test]
    async fn error_zero_drags_following_scores_through_the_smoother() {
        let (classifier, _) = classifier_with(TEST_CFG).await;
        classifier.classify(Observation::new(10, 503)).await.unwrap();
        let next = classifier.classify(Observation::new(50, 200)).await.unwrap();
        // Buffer is [0.0, 1.0]: (0*0.10 + 1*0.15) / 0.25
        assert!((next - 0.6).abs() < 1e-12);
    }

    #[tokio::test]
    async fn warm_steady_state_scores_half_at_the_ceiling() {
        let (classifier, _) = classifier_with(TEST_CFG).await;
        feed(&classifier, 50, 200).await;
        let score = classifier.classify(Observation::new(50, 200)).await.unwrap();
        assert!(score > 0.49 && score < 0.51, "score {score}");
    }

    #[tokio::test]
    async fn spike_drops_the_score_but_smoothing_bounds_it() {
        let (classifier, _) = classifier_with(TEST_CFG).await;
        feed(&classifier, 50, 200).await;
        let score = classifier.classify(Observation::new(2_000, 200)).await.unwrap();
        // Raw is (50-2000)/2000*0.5+0.5 = 0.0125; four prior ~0.5 raws hold it up.
        assert!(score > 0.40 && score < 0.45, "score {score}");
    }

    #[tokio::test]
    async fn window_rolls_after_exactly_window_size_samples() {
        let (classifier, store) = classifier_with(TEST_CFG).await;
        feed(&classifier, 50, 100).await;

        let current = store.load_current("edge", SCORE_QUANTILE).await.unwrap().unwrap();
        assert_eq!(current.psqr.count(), 1);
        let prev_id = current.previous_id.expect("previous window linked");
        let previous = store.load_by_id(prev_id).await.unwrap().unwrap();
        assert_eq!(previous.psqr.count(), 99);
    }

    #[tokio::test]
    async fn included_4xx_scores_zero_without_estimator_update() {
        let (classifier, store) = classifier_with(TEST_CFG).await;
        let score = classifier.classify(Observation::new(10, 404)).await.unwrap();
        assert_eq!(score, 0.0);
        assert!(store.load_current("edge", SCORE_QUANTILE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn excluded_4xx_counts_as_success_and_feeds_the_estimator() {
        let cfg = ClassifierConfig { include_4xx: false, ..TEST_CFG };
        let (classifier, store) = classifier_with(cfg).await;
        let score = classifier.classify(Observation::new(10, 404)).await.unwrap();

        assert_eq!(score, 1.0);
        let current = store.load_current("edge", SCORE_QUANTILE).await.unwrap().unwrap();
        assert_eq!(current.psqr.count(), 1);
    }

    #[tokio::test]
    async fn negative_elapsed_is_clamped_to_zero() {
        let (classifier, store) = classifier_with(TEST_CFG).await;
        classifier.classify(Observation::new(-42, 200)).await.unwrap();
        let current = store.load_current("edge", SCORE_QUANTILE).await.unwrap().unwrap();
        assert_eq!(current.psqr.count(), 1);
        assert!(current.psqr.q().iter().all(|&h| h >= 0.0));
    }

    #[tokio::test]
    async fn estimator_state_survives_a_classifier_restart() {
        let store = PsqrStore::new(test_pool().await);
        let telemetry = Arc::new(Telemetry::new());
        let first = ResponseClassifier::new("edge", TEST_CFG, store.clone(), telemetry.clone())
            .unwrap();
        for _ in 0..20 {
            first.classify(Observation::new(50, 200)).await.unwrap();
        }
        drop(first);

        let second = ResponseClassifier::new("edge", TEST_CFG, store.clone(), telemetry).unwrap();
        let score = second.classify(Observation::new(50, 200)).await.unwrap();
        // Restart picks up the persisted window: scoring is active, not cold.
        let current = store.load_current("edge", SCORE_QUANTILE).await.unwrap().unwrap();
        assert_eq!(current.psqr.count(), 21);
        assert!((score - 0.5).abs() < 0.01, "score {score}");
    }
}
