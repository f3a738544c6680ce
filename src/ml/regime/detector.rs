use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, info};

use super::RegimeState;
use crate::config::RegimeSettings;
use crate::error::{ensure_finite, CoreError, Result};

const STD_EPSILON: f64 = 1e-10;

/// Welford sufficient statistics of the observations in one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeStats {
    pub count: u64,
    pub mean: f64,
    m2: f64,
}

impl RegimeStats {
    fn absorb(&self, value: f64) -> Self {
        let count = self.count + 1;
        let delta = value - self.mean;
        let mean = self.mean + delta / count as f64;
        Self {
            count,
            mean,
            m2: self.m2 + delta * (value - mean),
        }
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }
}

/// Result of folding one observation into the run-length posterior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLengthUpdate {
    pub timestamp: DateTime<Utc>,
    /// MAP run length
    pub run_length: usize,
    /// Posterior mass at the MAP run length
    pub probability: f64,
    pub growth_probability: f64,
    pub change_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSummary {
    pub state: RegimeState,
    pub run_length: usize,
    pub probability: f64,
    pub mean: f64,
    pub variance: f64,
    pub count: u64,
    pub change_probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeDetectorState {
    pub beliefs: Vec<f64>,
    pub regimes: Vec<RegimeStats>,
    pub observations: u64,
    pub last_change_probability: f64,
}

/// Bayesian online change-point detector with a constant hazard.
///
/// Each run length carries the Welford statistics of its observations. The
/// predictive is the Gaussian with the mean and variance of the
/// Normal-Inverse-Gamma posterior predictive (a Student-t in the exact model).
/// Belief and regime buffers are allocated once at `max_run_length` and
/// shifted in place.
pub struct RegimeDetector {
    settings: RegimeSettings,
    beliefs: Vec<f64>,
    regimes: Vec<RegimeStats>,
    log_scratch: Vec<f64>,
    observations: u64,
    last_change_probability: f64,
}

impl RegimeDetector {
    pub fn new(settings: RegimeSettings) -> Self {
        let capacity = settings.max_run_length;
        let mut beliefs = Vec::with_capacity(capacity);
        let mut regimes = Vec::with_capacity(capacity);
        beliefs.push(1.0);
        regimes.push(RegimeStats::default());
        Self {
            settings,
            beliefs,
            regimes,
            log_scratch: Vec::with_capacity(capacity),
            observations: 0,
            last_change_probability: 0.0,
        }
    }

    pub fn update_observation(&mut self, value: f64) -> Result<RunLengthUpdate> {
        self.update_observation_at(value, Utc::now())
    }

    pub fn update_observation_at(&mut self, value: f64, timestamp: DateTime<Utc>) -> Result<RunLengthUpdate> {
        ensure_finite("regime observation", value)?;
        self.observations += 1;

        let max_len = self.settings.max_run_length;
        let log_hazard = self.settings.hazard_rate.ln();
        let log_survival = (1.0 - self.settings.hazard_rate).ln();

        // log(b[r] * p[r]) for every current run length
        self.log_scratch.clear();
        for r in 0..self.beliefs.len() {
            let term = self.beliefs[r].ln() + log_predictive(&self.settings, &self.regimes[r], value);
            self.log_scratch.push(term);
        }
        let log_change = log_sum_exp(&self.log_scratch) + log_hazard;

        let len = self.beliefs.len();
        // When the buffer is full the oldest run has nowhere to grow; its
        // mass is folded into the last slot instead of being dropped.
        let overflow = if len >= max_len && len >= 2 {
            Some((self.log_scratch[len - 1], self.regimes[len - 1].absorb(value)))
        } else {
            None
        };
        if len < max_len {
            self.beliefs.push(0.0);
            self.regimes.push(RegimeStats::default());
        }
        // Shift right in place
        for r in (0..len).rev() {
            if r + 1 < max_len {
                self.beliefs[r + 1] = self.log_scratch[r] + log_survival;
                self.regimes[r + 1] = self.regimes[r].absorb(value);
            }
        }
        if let Some((log_tail, tail_stats)) = overflow {
            let last = max_len - 1;
            let log_shifted = self.log_scratch[last - 1];
            self.beliefs[last] = log_sum_exp(&[log_shifted, log_tail]) + log_survival;
            // The last slot keeps the statistics of the heavier contributor
            if log_tail >= log_shifted {
                self.regimes[last] = tail_stats;
            }
        }
        self.beliefs[0] = log_change;
        self.regimes[0] = RegimeStats::default();

        let log_norm = log_sum_exp(&self.beliefs);
        for belief in self.beliefs.iter_mut() {
            *belief = (*belief - log_norm).exp();
        }
        let total: f64 = self.beliefs.iter().sum();
        if total > 0.0 {
            for belief in self.beliefs.iter_mut() {
                *belief /= total;
            }
        }

        let (run_length, probability) = self.map_run_length();
        let change_probability = if self.observations > self.settings.change_window as u64 {
            self.beliefs
                .iter()
                .take(self.settings.change_window + 1)
                .sum::<f64>()
                .clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.last_change_probability = change_probability;

        if change_probability > self.settings.change_threshold {
            info!(
                "Regime change signal: p={:.3}, MAP run length {} (obs #{})",
                change_probability, run_length, self.observations
            );
        } else {
            debug!("BOCPD: run length {} (p={:.3}), change p={:.4}", run_length, probability, change_probability);
        }

        Ok(RunLengthUpdate {
            timestamp,
            run_length,
            probability,
            growth_probability: 1.0 - change_probability,
            change_probability,
        })
    }

    fn map_run_length(&self) -> (usize, f64) {
        let mut best = (0, f64::NEG_INFINITY);
        for (r, &belief) in self.beliefs.iter().enumerate() {
            if belief > best.1 {
                best = (r, belief);
            }
        }
        best
    }

    /// Label and statistics of the MAP run
    pub fn current_regime(&self) -> RegimeSummary {
        let (run_length, probability) = self.map_run_length();
        let stats = self.regimes[run_length];
        let variance = stats.variance();

        let state = if self.last_change_probability > self.settings.change_threshold {
            RegimeState::Transition
        } else if stats.count < 2 {
            RegimeState::Neutral
        } else {
            let std = variance.sqrt();
            let score = if std > STD_EPSILON {
                stats.mean / std
            } else if stats.mean == 0.0 {
                0.0
            } else {
                stats.mean.signum() * f64::INFINITY
            };
            if score > self.settings.trend_threshold {
                RegimeState::Bull
            } else if score < -self.settings.trend_threshold {
                RegimeState::Bear
            } else {
                RegimeState::Neutral
            }
        };

        RegimeSummary {
            state,
            run_length,
            probability,
            mean: stats.mean,
            variance,
            count: stats.count,
            change_probability: self.last_change_probability,
        }
    }

    pub fn run_length_distribution(&self) -> &[f64] {
        &self.beliefs
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn reset(&mut self) {
        self.beliefs.clear();
        self.regimes.clear();
        self.log_scratch.clear();
        self.beliefs.push(1.0);
        self.regimes.push(RegimeStats::default());
        self.observations = 0;
        self.last_change_probability = 0.0;
    }

    pub fn export_state(&self) -> RegimeDetectorState {
        RegimeDetectorState {
            beliefs: self.beliefs.clone(),
            regimes: self.regimes.clone(),
            observations: self.observations,
            last_change_probability: self.last_change_probability,
        }
    }

    pub fn import_state(&mut self, state: RegimeDetectorState) -> Result<()> {
        let len = state.beliefs.len();
        if len == 0 || len != state.regimes.len() || len > self.settings.max_run_length {
            return Err(CoreError::InvalidSnapshot(format!(
                "regime detector: {} beliefs, {} regimes, max run length {}",
                len,
                state.regimes.len(),
                self.settings.max_run_length
            )));
        }
        let total: f64 = state.beliefs.iter().sum();
        if !total.is_finite() || (total - 1.0).abs() > 1e-6 || state.beliefs.iter().any(|b| *b < 0.0) {
            return Err(CoreError::InvalidSnapshot(format!(
                "regime detector: beliefs sum to {}",
                total
            )));
        }

        self.beliefs.clear();
        self.beliefs.extend(state.beliefs.iter().map(|b| b / total));
        self.regimes.clear();
        self.regimes.extend_from_slice(&state.regimes);
        self.observations = state.observations;
        self.last_change_probability = state.last_change_probability;
        Ok(())
    }
}

/// Log density of `value` under the Gaussian approximation of the
/// NIG posterior predictive for one run.
fn log_predictive(s: &RegimeSettings, stats: &RegimeStats, value: f64) -> f64 {
    let n = stats.count as f64;
    let kappa_n = s.prior_kappa + n;
    let mu_n = (s.prior_kappa * s.prior_mean + n * stats.mean) / kappa_n;
    let alpha_n = s.prior_alpha + n / 2.0;
    let beta_n = s.prior_beta
        + 0.5 * stats.m2
        + s.prior_kappa * n * (stats.mean - s.prior_mean).powi(2) / (2.0 * kappa_n);
    let variance = beta_n * (kappa_n + 1.0) / (alpha_n * kappa_n);

    -0.5 * ((2.0 * PI * variance).ln() + (value - mu_n).powi(2) / variance)
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = values.iter().map(|v| (v - max_val).exp()).sum();
    max_val + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn shifted_series(seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..200)
            .map(|i| {
                let level = if i < 100 { 0.0 } else { 3.0 };
                level + rng.gen_range(-0.1..0.1)
            })
            .collect()
    }

    #[test]
    fn test_detects_mean_shift() {
        let mut detector = RegimeDetector::new(RegimeSettings {
            hazard_rate: 0.01,
            ..RegimeSettings::default()
        });
        let series = shifted_series(17);

        let mut updates = Vec::new();
        for &x in &series {
            updates.push(detector.update_observation(x).unwrap());
        }

        assert!(
            updates[101].change_probability > 0.3,
            "change probability at 101 was {}",
            updates[101].change_probability
        );
        // Quiet before the shift
        assert!(updates[50..100].iter().all(|u| u.change_probability < 0.3));
        // The run length restarts after the shift and grows again
        assert!(updates[199].run_length < 110);
        assert!(updates[199].run_length >= 90);
    }

    #[test]
    fn test_stationary_series_past_max_run_length_stays_quiet() {
        let settings = RegimeSettings::default();
        let threshold = settings.change_threshold;
        let max_len = settings.max_run_length;
        let mut rng = StdRng::seed_from_u64(41);

        for (level, scale) in [(0.0, 0.1), (100.0, 0.01)] {
            let mut detector = RegimeDetector::new(settings.clone());
            let mut alarms = Vec::new();
            for i in 0..(3 * max_len + 10) {
                let update = detector.update_observation(level + scale * rng.gen_range(-1.0..1.0)).unwrap();
                if i >= 50 && update.change_probability > threshold {
                    alarms.push(i);
                }
            }
            assert!(alarms.is_empty(), "level {}: false alarms at {:?}", level, alarms);

            let beliefs = detector.run_length_distribution();
            assert_eq!(beliefs.len(), max_len);
            assert!((beliefs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            let summary = detector.current_regime();
            assert_eq!(summary.run_length, max_len - 1);
            assert!(summary.count as usize > max_len);
        }
    }

    #[test]
    fn test_beliefs_are_normalized_and_bounded() {
        let settings = RegimeSettings {
            max_run_length: 20,
            ..RegimeSettings::default()
        };
        let mut detector = RegimeDetector::new(settings);
        let mut rng = StdRng::seed_from_u64(99);

        for i in 0..300 {
            let level = if (i / 40) % 2 == 0 { -1.0 } else { 2.0 };
            let update = detector.update_observation(level + rng.gen_range(-0.5..0.5)).unwrap();

            let beliefs = detector.run_length_distribution();
            let total: f64 = beliefs.iter().sum();
            assert!((total - 1.0).abs() < 1e-9, "sum {} at step {}", total, i);
            assert!(beliefs.len() <= 20);
            assert!((0.0..=1.0).contains(&update.change_probability));
            assert!((update.change_probability + update.growth_probability - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_extreme_outlier_does_not_underflow() {
        let mut detector = RegimeDetector::new(RegimeSettings::default());
        for _ in 0..50 {
            detector.update_observation(0.0).unwrap();
        }
        let update = detector.update_observation(1e6).unwrap();
        let total: f64 = detector.run_length_distribution().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(update.probability.is_finite());
    }

    #[test]
    fn test_rejects_non_finite_observation() {
        let mut detector = RegimeDetector::new(RegimeSettings::default());
        assert!(detector.update_observation(f64::NAN).is_err());
        assert_eq!(detector.observations(), 0);
    }

    #[test]
    fn test_regime_labels() {
        let mut detector = RegimeDetector::new(RegimeSettings::default());
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..80 {
            detector.update_observation(1.0 + rng.gen_range(-0.2..0.2)).unwrap();
        }
        assert_eq!(detector.current_regime().state, RegimeState::Bull);

        detector.reset();
        for _ in 0..80 {
            detector.update_observation(-1.0 + rng.gen_range(-0.2..0.2)).unwrap();
        }
        let summary = detector.current_regime();
        assert_eq!(summary.state, RegimeState::Bear);
        assert!(summary.mean < -0.8);
    }

    #[test]
    fn test_reset_restores_prior() {
        let mut detector = RegimeDetector::new(RegimeSettings::default());
        for x in shifted_series(1) {
            detector.update_observation(x).unwrap();
        }
        detector.reset();
        assert_eq!(detector.run_length_distribution(), &[1.0]);
        assert_eq!(detector.observations(), 0);
    }

    #[test]
    fn test_state_roundtrip_continues_identically() {
        let series = shifted_series(23);
        let mut original = RegimeDetector::new(RegimeSettings::default());
        for &x in &series[..120] {
            original.update_observation(x).unwrap();
        }

        let mut restored = RegimeDetector::new(RegimeSettings::default());
        restored.import_state(original.export_state()).unwrap();

        for &x in &series[120..] {
            let a = original.update_observation(x).unwrap();
            let b = restored.update_observation(x).unwrap();
            assert_eq!(a.run_length, b.run_length);
            assert!((a.change_probability - b.change_probability).abs() < 1e-12);
        }
    }

    #[test]
    fn test_import_rejects_unnormalized_beliefs() {
        let mut detector = RegimeDetector::new(RegimeSettings::default());
        let state = RegimeDetectorState {
            beliefs: vec![0.2, 0.2],
            regimes: vec![RegimeStats::default(); 2],
            observations: 2,
            last_change_probability: 0.0,
        };
        assert!(detector.import_state(state).is_err());
    }
}
