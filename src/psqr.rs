//! Streaming single-quantile estimation (the P-square algorithm).
//!
//! Five markers track the minimum, the p/2, p and (1+p)/2 quantiles, and the
//! maximum of the stream. Marker heights are nudged toward their desired
//! positions with a parabolic fit, falling back to linear interpolation when
//! the parabola would break marker ordering. Memory is constant regardless of
//! stream length.

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Psqr {
    quantile: f64,
    count: i64,
    /// Marker heights, kept ascending. `q[2]` is the current estimate.
    q: [f64; 5],
    /// Integer marker positions. `n[0]` stays 1; `n[4]` tracks the count.
    n: [i64; 5],
    /// Desired (fractional) marker positions.
    np: [f64; 5],
    /// Per-observation increment of the desired positions.
    dn: [f64; 5],
}

impl Psqr {
    /// Creates an estimator for the `quantile`-quantile, `quantile` in (0,1).
    pub fn new(quantile: f64) -> Result<Self> {
        if !(quantile > 0.0 && quantile < 1.0) {
            return Err(AppError::Config(format!(
                "quantile must be in (0,1), got {quantile}"
            )));
        }
        let mut p = Self {
            quantile,
            count: 0,
            q: [0.0; 5],
            n: [0; 5],
            np: [0.0; 5],
            dn: [0.0; 5],
        };
        p.reset();
        Ok(p)
    }

    /// Rebuilds an estimator from persisted state. The repository validates the
    /// stored quantile before calling this.
    pub(crate) fn restore(
        quantile: f64,
        count: i64,
        q: [f64; 5],
        n: [i64; 5],
        np: [f64; 5],
        dn: [f64; 5],
    ) -> Self {
        Self { quantile, count, q, n, np, dn }
    }

    /// Absorbs one observation and returns the running estimate. Values below
    /// zero are clamped to zero. The returned estimate is meaningless until
    /// more than five observations have been absorbed.
    pub fn add(&mut self, v: f64) -> f64 {
        let v = v.max(0.0);

        if self.count < 5 {
            self.q[self.count as usize] = v;
            self.count += 1;
            if self.count == 5 {
                self.q.sort_by(f64::total_cmp);
            }
            return self.q[2];
        }

        self.count += 1;

        // Find cell k with q[k-1] <= v < q[k], widening the extremes if needed.
        let mut k = self.q.iter().position(|&h| v < h).unwrap_or(5);
        if k == 0 {
            self.q[0] = v;
            k = 1;
        } else if k == 5 {
            self.q[4] = v;
            k = 4;
        }

        for i in k..5 {
            self.n[i] += 1;
        }
        for i in 0..5 {
            self.np[i] += self.dn[i];
        }

        // Nudge interior markers whose actual position drifted a full step from
        // the desired one, provided a neighbor gap can absorb the move.
        for i in 1..4 {
            let d = self.np[i] - self.n[i] as f64;
            if (d >= 1.0 && self.n[i + 1] - self.n[i] > 1)
                || (d <= -1.0 && self.n[i - 1] - self.n[i] < -1)
            {
                let s: i64 = if d < 0.0 { -1 } else { 1 };
                let candidate = self.parabolic(i, s);
                self.q[i] = if self.q[i - 1] < candidate && candidate < self.q[i + 1] {
                    candidate
                } else {
                    self.linear(i, s)
                };
                self.n[i] += s;
            }
        }

        self.q[2]
    }

    /// Current estimate of the tracked quantile.
    pub fn get(&self) -> f64 {
        self.q[2]
    }

    /// Clears counters and marker positions for a fresh window. Marker heights
    /// are kept: the closed window's bracket warm-starts the next one.
    pub fn reset(&mut self) {
        let p = self.quantile;
        self.count = 0;
        self.dn = [0.0, p * 0.5, p, (1.0 + p) * 0.5, 1.0];
        for i in 0..5 {
            self.n[i] = (i + 1) as i64;
            self.np[i] = self.dn[i] * 4.0 + 1.0;
        }
    }

    fn parabolic(&self, i: usize, s: i64) -> f64 {
        let (qi, qip1, qim1) = (self.q[i], self.q[i + 1], self.q[i - 1]);
        let (ni, nip1, nim1) = (self.n[i] as f64, self.n[i + 1] as f64, self.n[i - 1] as f64);
        let s = s as f64;
        qi + s / (nip1 - nim1)
            * ((ni - nim1 + s) * (qip1 - qi) / (nip1 - ni)
                + (nip1 - ni - s) * (qi - qim1) / (ni - nim1))
    }

    fn linear(&self, i: usize, s: i64) -> f64 {
        let j = (i as i64 + s) as usize;
        self.q[i] + s as f64 * (self.q[j] - self.q[i]) / (self.n[j] - self.n[i]) as f64
    }

    pub fn quantile(&self) -> f64 {
        self.quantile
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn q(&self) -> [f64; 5] {
        self.q
    }

    pub fn n(&self) -> [i64; 5] {
        self.n
    }

    pub fn np(&self) -> [f64; 5] {
        self.np
    }

    pub fn dn(&self) -> [f64; 5] {
        self.dn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Exact percentile of a sample, nearest-rank.
    fn exact_percentile(samples: &[f64], p: f64) -> f64 {
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let idx = ((sorted.len() as f64 * p).ceil() as usize).clamp(1, sorted.len()) - 1;
        sorted[idx]
    }

    fn assert_sorted(psqr: &Psqr) {
        let q = psqr.q();
        for i in 1..5 {
            assert!(
                q[i - 1] <= q[i],
                "markers out of order at {i}: {:?}",
                q
            );
        }
    }

    #[test]
    fn rejects_quantile_outside_unit_interval() {
        assert!(Psqr::new(0.0).is_err());
        assert!(Psqr::new(1.0).is_err());
        assert!(Psqr::new(-0.5).is_err());
        assert!(Psqr::new(0.95).is_ok());
    }

    #[test]
    fn tracks_quantiles_of_a_uniform_stream_within_five_percent() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<f64> = (0..10_000).map(|_| rng.gen_range(100.0..200.0)).collect();

        for p in [0.5, 0.9, 0.95, 0.99] {
            let mut psqr = Psqr::new(p).unwrap();
            for &v in &samples {
                psqr.add(v);
            }
            let exact = exact_percentile(&samples, p);
            let rel_err = (psqr.get() - exact).abs() / exact;
            assert!(
                rel_err < 0.05,
                "p={p}: estimate {} vs exact {exact}, rel err {rel_err}",
                psqr.get()
            );
        }
    }

    #[test]
    fn markers_stay_sorted_after_every_add() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut psqr = Psqr::new(0.95).unwrap();
        for i in 0..2_000 {
            psqr.add(rng.gen_range(0.0..1_000.0));
            if i >= 4 {
                assert_sorted(&psqr);
            }
        }
    }

    #[test]
    fn constant_stream_returns_the_constant() {
        let mut psqr = Psqr::new(0.95).unwrap();
        for _ in 0..1_000 {
            psqr.add(42.0);
        }
        assert_eq!(psqr.get(), 42.0);
    }

    #[test]
    fn reset_clears_counters_but_keeps_heights() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut psqr = Psqr::new(0.95).unwrap();
        for _ in 0..500 {
            psqr.add(rng.gen_range(40.0..60.0));
        }
        let heights = psqr.q();
        psqr.reset();

        assert_eq!(psqr.count(), 0);
        assert_eq!(psqr.n(), [1, 2, 3, 4, 5]);
        let dn = psqr.dn();
        assert_eq!(dn, [0.0, 0.95 * 0.5, 0.95, (1.0 + 0.95) * 0.5, 1.0]);
        for i in 0..5 {
            assert_eq!(psqr.np()[i], dn[i] * 4.0 + 1.0);
        }
        assert_eq!(psqr.q(), heights);
    }

    #[test]
    fn warm_started_markers_keep_tracking_after_reset() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut psqr = Psqr::new(0.95).unwrap();
        for _ in 0..1_000 {
            psqr.add(rng.gen_range(40.0..60.0));
        }
        psqr.reset();

        let samples: Vec<f64> = (0..2_000).map(|_| rng.gen_range(40.0..60.0)).collect();
        for &v in &samples {
            psqr.add(v);
        }
        let exact = exact_percentile(&samples, 0.95);
        assert!((psqr.get() - exact).abs() / exact < 0.05);
    }

    #[test]
    fn negative_observations_are_clamped_to_zero() {
        let mut psqr = Psqr::new(0.5).unwrap();
        for _ in 0..100 {
            psqr.add(-25.0);
        }
        assert_eq!(psqr.get(), 0.0);
        assert!(psqr.q().iter().all(|&h| h == 0.0));
    }

    #[test]
    fn extremes_widen_to_cover_new_min_and_max() {
        let mut psqr = Psqr::new(0.95).unwrap();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0, 25.0] {
            psqr.add(v);
        }
        psqr.add(1.0);
        assert_eq!(psqr.q()[0], 1.0);
        psqr.add(500.0);
        assert_eq!(psqr.q()[4], 500.0);
        assert_sorted(&psqr);
    }
}
