use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RegressionSettings;
use crate::error::{CoreError, Result};
use crate::types::FeatureMap;

const STD_EPSILON: f64 = 1e-10;
const MAX_CONFIDENCE: f64 = 0.95;

/// Welford running mean/variance for one feature
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u64,
    pub mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    /// z-score, 0 for a feature with no spread yet
    pub fn normalize(&self, value: f64) -> f64 {
        let std = self.std();
        if std > STD_EPSILON {
            (value - self.mean) / std
        } else {
            0.0
        }
    }
}

/// Prediction report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionPrediction {
    pub prediction: f64,
    pub confidence: f64,
    pub active_features: usize,
    pub l1_penalty: f64,
    pub l2_penalty: f64,
}

impl RegressionPrediction {
    fn cold() -> Self {
        Self {
            prediction: 0.0,
            confidence: 0.0,
            active_features: 0,
            l1_penalty: 0.0,
            l2_penalty: 0.0,
        }
    }
}

/// Model weights and normalization statistics for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionState {
    pub weights: BTreeMap<String, f64>,
    pub intercept: f64,
    pub feature_stats: BTreeMap<String, RunningStats>,
    pub sample_count: u64,
    pub recent_errors: Vec<f64>,
}

/// Online elastic-net regressor trained by proximal stochastic gradient steps.
///
/// Weights live in z-score space. The L1 part of the penalty is applied twice:
/// as a subgradient inside the step, then as a soft-threshold that produces
/// exact zeros.
pub struct OnlineElasticNet {
    settings: RegressionSettings,
    weights: BTreeMap<String, f64>,
    intercept: f64,
    feature_stats: BTreeMap<String, RunningStats>,
    sample_count: u64,
    recent_errors: VecDeque<f64>,
}

impl OnlineElasticNet {
    pub fn new(settings: RegressionSettings) -> Self {
        let error_window = settings.error_window;
        Self {
            settings,
            weights: BTreeMap::new(),
            intercept: 0.0,
            feature_stats: BTreeMap::new(),
            sample_count: 0,
            recent_errors: VecDeque::with_capacity(error_window),
        }
    }

    /// One proximal-gradient step on a single sample.
    /// Returns the pre-update prediction error.
    pub fn partial_fit(&mut self, features: &FeatureMap, target: f64, sample_weight: f64) -> f64 {
        self.sample_count += 1;

        for (feature_id, &value) in features {
            self.feature_stats.entry(feature_id.clone()).or_default().update(value);
        }

        let normalized = self.normalize(features);
        let prediction = self.linear_output(&normalized);
        let error = target - prediction;

        let alpha = self.settings.alpha;
        let l1_ratio = self.settings.l1_ratio;
        let learning_rate = self.settings.base_learning_rate / (self.sample_count as f64).sqrt();
        let threshold = self.settings.base_learning_rate * alpha * l1_ratio;

        for (feature_id, z) in &normalized {
            let weight = self.weights.entry(feature_id.clone()).or_insert(0.0);
            let gradient = -error * z * sample_weight
                + alpha * l1_ratio * sign(*weight)
                + alpha * (1.0 - l1_ratio) * *weight;
            *weight = soft_threshold(*weight - learning_rate * gradient, threshold);
        }
        self.intercept += learning_rate * error * sample_weight;

        if self.recent_errors.len() == self.settings.error_window {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(error.abs());

        if self.sample_count == self.settings.min_samples {
            info!(
                "Elastic net warmed up: {} samples, {} features tracked",
                self.sample_count,
                self.feature_stats.len()
            );
        }

        error
    }

    pub fn predict(&self, features: &FeatureMap) -> RegressionPrediction {
        if self.sample_count < self.settings.min_samples {
            return RegressionPrediction::cold();
        }

        let normalized = self.normalize(features);
        let prediction = self.linear_output(&normalized);

        let coverage = if features.is_empty() {
            0.0
        } else {
            let known = features.keys().filter(|k| self.feature_stats.contains_key(*k)).count();
            known as f64 / features.len() as f64
        };
        let confidence = (coverage * self.convergence_score()).min(MAX_CONFIDENCE);

        let (l1_penalty, l2_penalty) = self.penalties();
        let result = RegressionPrediction {
            prediction,
            confidence,
            active_features: self.active_features(),
            l1_penalty,
            l2_penalty,
        };
        debug!(
            "Elastic net prediction: {:.4} (confidence {:.2}, {} active)",
            result.prediction, result.confidence, result.active_features
        );
        result
    }

    fn normalize(&self, features: &FeatureMap) -> Vec<(String, f64)> {
        features
            .iter()
            .map(|(feature_id, &value)| {
                let z = self
                    .feature_stats
                    .get(feature_id)
                    .map(|stats| stats.normalize(value))
                    .unwrap_or(0.0);
                (feature_id.clone(), z)
            })
            .collect()
    }

    fn linear_output(&self, normalized: &[(String, f64)]) -> f64 {
        self.intercept
            + normalized
                .iter()
                .map(|(feature_id, z)| self.weights.get(feature_id).copied().unwrap_or(0.0) * z)
                .sum::<f64>()
    }

    /// `exp(-mean) * exp(-std)` of the recent absolute errors
    fn convergence_score(&self) -> f64 {
        if self.recent_errors.is_empty() {
            return 0.0;
        }
        let n = self.recent_errors.len() as f64;
        let mean = self.recent_errors.iter().sum::<f64>() / n;
        let var = self.recent_errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
        (-mean).exp() * (-var.sqrt()).exp()
    }

    fn penalties(&self) -> (f64, f64) {
        let alpha = self.settings.alpha;
        let l1_ratio = self.settings.l1_ratio;
        let l1: f64 = self.weights.values().map(|w| w.abs()).sum();
        let l2: f64 = self.weights.values().map(|w| w * w).sum();
        (alpha * l1_ratio * l1, 0.5 * alpha * (1.0 - l1_ratio) * l2)
    }

    pub fn active_features(&self) -> usize {
        self.weights.values().filter(|w| **w != 0.0).count()
    }

    pub fn weight(&self, feature_id: &str) -> Option<f64> {
        self.weights.get(feature_id).copied()
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn is_warm(&self) -> bool {
        self.sample_count >= self.settings.min_samples
    }

    pub fn reset(&mut self) {
        self.weights.clear();
        self.intercept = 0.0;
        self.feature_stats.clear();
        self.sample_count = 0;
        self.recent_errors.clear();
    }

    pub fn export_state(&self) -> RegressionState {
        RegressionState {
            weights: self.weights.clone(),
            intercept: self.intercept,
            feature_stats: self.feature_stats.clone(),
            sample_count: self.sample_count,
            recent_errors: self.recent_errors.iter().copied().collect(),
        }
    }

    pub fn import_state(&mut self, state: RegressionState) -> Result<()> {
        if state.weights.values().chain(state.recent_errors.iter()).any(|v| !v.is_finite())
            || !state.intercept.is_finite()
        {
            return Err(CoreError::InvalidSnapshot("regression: non-finite weight or error".to_string()));
        }
        let window = self.settings.error_window;
        let skip = state.recent_errors.len().saturating_sub(window);

        self.weights = state.weights;
        self.intercept = state.intercept;
        self.feature_stats = state.feature_stats;
        self.sample_count = state.sample_count;
        self.recent_errors = state.recent_errors.into_iter().skip(skip).collect();
        Ok(())
    }
}

/// Sign with `sign(0) == 0`, unlike `f64::signum`
fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn soft_threshold(x: f64, threshold: f64) -> f64 {
    sign(x) * (x.abs() - threshold).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn gaussian(rng: &mut StdRng) -> f64 {
        // Box-Muller
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn sample(rng: &mut StdRng) -> (FeatureMap, f64) {
        let x1 = gaussian(rng);
        let mut features = FeatureMap::new();
        features.insert("x1".to_string(), x1);
        for j in 0..5 {
            features.insert(format!("irrelevant_{}", j), gaussian(rng));
        }
        let y = 2.0 * x1 + 0.1 * gaussian(rng);
        (features, y)
    }

    #[test]
    fn test_recovers_sparse_linear_signal() {
        let mut model = OnlineElasticNet::new(RegressionSettings::default());
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..2000 {
            let (features, y) = sample(&mut rng);
            model.partial_fit(&features, y, 1.0);
        }

        let w1 = model.weight("x1").unwrap();
        assert!((w1 - 2.0).abs() < 0.3, "x1 weight {}", w1);
        for j in 0..5 {
            let w = model.weight(&format!("irrelevant_{}", j)).unwrap();
            assert!((-0.05..=0.05).contains(&w), "irrelevant_{} weight {}", j, w);
        }

        let (features, _) = sample(&mut rng);
        let prediction = model.predict(&features);
        assert!(prediction.confidence > 0.0 && prediction.confidence <= 0.95);
        assert!(prediction.l1_penalty > 0.0);
        assert!(prediction.l2_penalty > 0.0);
    }

    #[test]
    fn test_cold_start_returns_zero_confidence() {
        let mut model = OnlineElasticNet::new(RegressionSettings::default());
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..9 {
            let (features, y) = sample(&mut rng);
            model.partial_fit(&features, y, 1.0);
        }
        let (features, _) = sample(&mut rng);
        let cold = model.predict(&features);
        assert_eq!(cold.confidence, 0.0);
        assert_eq!(cold.prediction, 0.0);
        assert!(!model.is_warm());

        let (features, y) = sample(&mut rng);
        model.partial_fit(&features, y, 1.0);
        assert!(model.is_warm());
    }

    #[test]
    fn test_zero_weight_stays_zero_under_null_gradient() {
        let mut model = OnlineElasticNet::new(RegressionSettings::default());
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let (mut features, y) = sample(&mut rng);
            // Constant feature: z-score is always 0, so its gradient is null
            features.insert("constant".to_string(), 4.2);
            model.partial_fit(&features, y, 1.0);
            assert_eq!(model.weight("constant"), Some(0.0));
        }
    }

    #[test]
    fn test_soft_threshold_zeroes_small_weight_and_keeps_it() {
        let mut model = OnlineElasticNet::new(RegressionSettings::default());
        let mut state = model.export_state();
        state.weights.insert("tiny".to_string(), 1e-6);
        model.import_state(state).unwrap();

        let mut features = FeatureMap::new();
        features.insert("tiny".to_string(), 1.0);
        for _ in 0..20 {
            model.partial_fit(&features, 0.5, 1.0);
            assert_eq!(model.weight("tiny"), Some(0.0));
        }
        assert_eq!(model.active_features(), 0);
    }

    #[test]
    fn test_coverage_scales_confidence() {
        let mut model = OnlineElasticNet::new(RegressionSettings::default());
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..500 {
            let (features, y) = sample(&mut rng);
            model.partial_fit(&features, y, 1.0);
        }
        let (features, _) = sample(&mut rng);
        let full = model.predict(&features);

        let mut half = FeatureMap::new();
        half.insert("x1".to_string(), features["x1"]);
        half.insert("unseen".to_string(), 1.0);
        let partial = model.predict(&half);
        assert!(partial.confidence < full.confidence || full.confidence == MAX_CONFIDENCE);
        assert!(partial.confidence <= 0.5);
    }

    #[test]
    fn test_reset_and_state_roundtrip() {
        let mut model = OnlineElasticNet::new(RegressionSettings::default());
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..50 {
            let (features, y) = sample(&mut rng);
            model.partial_fit(&features, y, 1.0);
        }
        let state = model.export_state();
        let mut restored = OnlineElasticNet::new(RegressionSettings::default());
        restored.import_state(state.clone()).unwrap();
        assert_eq!(restored.export_state(), state);

        model.reset();
        assert_eq!(model.sample_count(), 0);
        assert!(model.weights().is_empty());
    }

    #[test]
    fn test_import_rejects_non_finite() {
        let mut model = OnlineElasticNet::new(RegressionSettings::default());
        let mut state = model.export_state();
        state.intercept = f64::NAN;
        assert!(model.import_state(state).is_err());
    }
}
