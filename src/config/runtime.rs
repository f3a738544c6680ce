use serde::{Deserialize, Serialize};

use super::profiles::ControllerProfile;
use crate::risk::SafetyLimits;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub profile: ControllerProfile,
    pub strategies: Vec<String>,
    pub features: FeatureSelectionSettings,
    pub regression: RegressionSettings,
    pub regime: RegimeSettings,
    pub bandit: BanditSettings,
    pub safety: SafetyGateSettings,
    pub meta: MetaSettings,
    pub limits: SafetyLimits,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            profile: ControllerProfile::Balanced,
            strategies: vec![
                "trend".to_string(),
                "momentum".to_string(),
                "mean_reversion".to_string(),
                "breakout".to_string(),
            ],
            features: FeatureSelectionSettings::default(),
            regression: RegressionSettings::default(),
            regime: RegimeSettings::default(),
            bandit: BanditSettings::default(),
            safety: SafetyGateSettings::default(),
            meta: MetaSettings::default(),
            limits: SafetyLimits::default(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.strategies.is_empty() {
            errors.push("at least one strategy is required".to_string());
        }
        let mut seen = std::collections::BTreeSet::new();
        for id in &self.strategies {
            if !seen.insert(id.as_str()) {
                errors.push(format!("duplicate strategy id: {}", id));
            }
        }

        // Feature selection
        if self.features.top_k == 0 {
            errors.push("features.top_k must be > 0".to_string());
        }
        if self.features.window_size == 0 {
            errors.push("features.window_size must be > 0".to_string());
        }
        if self.features.relevance_weight < 0.0 || self.features.redundancy_weight < 0.0 {
            errors.push("features: relevance/redundancy weights must be >= 0".to_string());
        }

        // Regression
        if self.regression.alpha < 0.0 {
            errors.push("regression.alpha must be >= 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.regression.l1_ratio) {
            errors.push("regression.l1_ratio must be between 0 and 1".to_string());
        }
        if self.regression.base_learning_rate <= 0.0 {
            errors.push("regression.base_learning_rate must be > 0".to_string());
        }
        if self.regression.error_window == 0 {
            errors.push("regression.error_window must be > 0".to_string());
        }

        // Regime
        if self.regime.hazard_rate <= 0.0 || self.regime.hazard_rate >= 1.0 {
            errors.push("regime.hazard_rate must be in (0, 1)".to_string());
        }
        if self.regime.max_run_length < 2 {
            errors.push("regime.max_run_length must be >= 2".to_string());
        }
        if self.regime.change_window >= self.regime.max_run_length {
            errors.push("regime.change_window must be < max_run_length".to_string());
        }
        if self.regime.prior_kappa <= 0.0 || self.regime.prior_alpha <= 0.0 || self.regime.prior_beta <= 0.0 {
            errors.push("regime: prior kappa/alpha/beta must be > 0".to_string());
        }

        // Bandit
        if self.bandit.exploration_constant < 0.0 {
            errors.push("bandit.exploration_constant must be >= 0".to_string());
        }
        if self.bandit.min_exploration_constant > self.bandit.max_exploration_constant {
            errors.push("bandit: min_exploration_constant must be <= max_exploration_constant".to_string());
        }
        if self.bandit.decay_rate <= 0.0 || self.bandit.decay_rate > 1.0 {
            errors.push("bandit.decay_rate must be in (0, 1]".to_string());
        }
        if self.bandit.reward_window == 0 {
            errors.push("bandit.reward_window must be > 0".to_string());
        }

        // Safety gate
        if self.safety.min_dataset_size == 0 {
            errors.push("safety.min_dataset_size must be > 0".to_string());
        }
        if self.safety.max_history < self.safety.min_dataset_size {
            errors.push("safety.max_history must be >= min_dataset_size".to_string());
        }
        if self.safety.bootstrap_samples == 0 {
            errors.push("safety.bootstrap_samples must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&self.safety.confidence_level) {
            errors.push("safety.confidence_level must be in [0, 1)".to_string());
        }
        if !(0.0..=1.0).contains(&self.safety.safety_threshold) {
            errors.push("safety.safety_threshold must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.safety.risk_tolerance_ratio) {
            errors.push("safety.risk_tolerance_ratio must be between 0 and 1".to_string());
        }
        if self.safety.max_importance_weight < 1.0 {
            errors.push("safety.max_importance_weight must be >= 1".to_string());
        }

        // Meta
        if self.meta.adaptation_interval == 0 || self.meta.evolution_interval == 0 || self.meta.safety_check_interval == 0 {
            errors.push("meta: intervals must be > 0".to_string());
        }
        if self.meta.trend_window < 4 {
            errors.push("meta.trend_window must be >= 4".to_string());
        }
        if self.meta.exploration_step <= 0.0 || self.meta.exploration_step >= 1.0 {
            errors.push("meta.exploration_step must be in (0, 1)".to_string());
        }

        if let Err(e) = self.limits.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureSelectionSettings {
    pub top_k: usize,
    pub window_size: usize,
    pub relevance_weight: f64,
    pub redundancy_weight: f64,
}

impl Default for FeatureSelectionSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            window_size: 100,
            relevance_weight: 1.0,
            redundancy_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegressionSettings {
    pub alpha: f64,
    pub l1_ratio: f64,
    pub base_learning_rate: f64,
    pub min_samples: u64,
    pub error_window: usize,
}

impl Default for RegressionSettings {
    fn default() -> Self {
        Self {
            alpha: 0.001,
            l1_ratio: 0.5,
            base_learning_rate: 0.1,
            min_samples: 10,
            error_window: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegimeSettings {
    pub hazard_rate: f64,
    pub max_run_length: usize,
    pub change_threshold: f64,
    /// Run lengths at or below this count as "recently changed".
    pub change_window: usize,
    pub prior_mean: f64,
    pub prior_kappa: f64,
    pub prior_alpha: f64,
    pub prior_beta: f64,
    /// Mean/std ratio above which a settled regime reads as Bull (below the
    /// negative as Bear).
    pub trend_threshold: f64,
}

impl Default for RegimeSettings {
    fn default() -> Self {
        Self {
            hazard_rate: 0.01,
            max_run_length: 200,
            change_threshold: 0.5,
            change_window: 5,
            prior_mean: 0.0,
            prior_kappa: 1.0,
            prior_alpha: 1.0,
            prior_beta: 1.0,
            trend_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BanditSettings {
    pub exploration_constant: f64,
    pub min_exploration_constant: f64,
    pub max_exploration_constant: f64,
    pub min_exploration_period: u64,
    pub decay_rate: f64,
    pub reward_window: usize,
}

impl Default for BanditSettings {
    fn default() -> Self {
        Self {
            exploration_constant: std::f64::consts::SQRT_2,
            min_exploration_constant: 0.1,
            max_exploration_constant: 5.0,
            min_exploration_period: 20,
            decay_rate: 0.99,
            reward_window: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyGateSettings {
    pub min_dataset_size: usize,
    pub max_history: usize,
    pub bootstrap_samples: usize,
    /// Optional wall-clock budget for the bootstrap loop, in milliseconds.
    pub bootstrap_budget_ms: Option<u64>,
    pub confidence_level: f64,
    pub safety_threshold: f64,
    pub min_expected_return: f64,
    pub risk_tolerance_ratio: f64,
    pub max_policy_deviation: f64,
    pub max_importance_weight: f64,
    pub seed: u64,
}

impl Default for SafetyGateSettings {
    fn default() -> Self {
        Self {
            min_dataset_size: 100,
            max_history: 10_000,
            bootstrap_samples: 1000,
            bootstrap_budget_ms: None,
            confidence_level: 0.95,
            safety_threshold: 0.9,
            min_expected_return: 0.0,
            risk_tolerance_ratio: 0.05,
            max_policy_deviation: 0.3,
            max_importance_weight: 2.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetaSettings {
    pub min_samples_for_adaptation: u64,
    pub adaptation_interval: u64,
    pub evolution_interval: u64,
    pub safety_check_interval: u64,
    pub regime_reset_threshold: f64,
    pub performance_history_len: usize,
    pub trend_window: usize,
    pub exploration_step: f64,
    pub confidence_buckets: usize,
}

impl Default for MetaSettings {
    fn default() -> Self {
        Self {
            min_samples_for_adaptation: 100,
            adaptation_interval: 50,
            evolution_interval: 100,
            safety_check_interval: 100,
            regime_reset_threshold: 0.5,
            performance_history_len: 1000,
            trend_window: 20,
            exploration_step: 0.1,
            confidence_buckets: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = ControllerConfig::default();
        config.strategies.clear();
        config.regime.hazard_rate = 1.5;
        config.regression.l1_ratio = 2.0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("hazard_rate")));
    }

    #[test]
    fn test_duplicate_strategies_rejected() {
        let config = ControllerConfig {
            strategies: vec!["trend".into(), "trend".into()],
            ..ControllerConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("duplicate"));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: ControllerConfig = toml::from_str("[bandit]\nmin_exploration_period = 5\n").unwrap();
        assert_eq!(config.bandit.min_exploration_period, 5);
        assert_eq!(config.bandit.decay_rate, 0.99);
        assert_eq!(config.strategies.len(), 4);
    }
}
