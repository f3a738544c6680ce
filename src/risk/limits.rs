use serde::{Deserialize, Serialize};

use crate::types::SafetyFlags;

/// Thresholds the controller reports against on every decision.
///
/// Breaches are surfaced as flags for the downstream risk layer; they never
/// change the selected strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLimits {
    // Decision quality
    pub min_confidence: f64,
    pub max_uncertainty: f64,

    // Regime stability
    pub max_change_probability: f64,

    // Realized reward drawdown of the selected strategy
    pub max_reward_drawdown: f64,

    // Samples before decisions are considered warmed up
    pub min_warmup_samples: u64,
}

impl SafetyLimits {
    pub fn conservative() -> Self {
        Self {
            min_confidence: 0.4,
            max_uncertainty: 0.6,
            max_change_probability: 0.3,
            max_reward_drawdown: 0.1,
            min_warmup_samples: 200,
        }
    }

    pub fn moderate() -> Self {
        Self {
            min_confidence: 0.25,
            max_uncertainty: 0.75,
            max_change_probability: 0.5,
            max_reward_drawdown: 0.2,
            min_warmup_samples: 100,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            min_confidence: 0.1,
            max_uncertainty: 0.9,
            max_change_probability: 0.7,
            max_reward_drawdown: 0.35,
            min_warmup_samples: 50,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err("Min confidence must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.max_uncertainty) {
            return Err("Max uncertainty must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.max_change_probability) {
            return Err("Max change probability must be between 0 and 1".to_string());
        }
        if self.max_reward_drawdown <= 0.0 {
            return Err("Max reward drawdown must be > 0".to_string());
        }
        Ok(())
    }

    pub fn evaluate(&self, snapshot: &LimitSnapshot) -> SafetyFlags {
        SafetyFlags {
            warming_up: snapshot.sample_count < self.min_warmup_samples,
            low_confidence: snapshot.confidence < self.min_confidence,
            high_uncertainty: snapshot.uncertainty > self.max_uncertainty,
            regime_unstable: snapshot.change_probability > self.max_change_probability,
            drawdown_breached: snapshot.reward_drawdown > self.max_reward_drawdown,
            ..SafetyFlags::default()
        }
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self::moderate()
    }
}

/// Values a decision is checked against
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LimitSnapshot {
    pub confidence: f64,
    pub uncertainty: f64,
    pub change_probability: f64,
    pub reward_drawdown: f64,
    pub sample_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_limits_validation() {
        for limits in [SafetyLimits::conservative(), SafetyLimits::moderate(), SafetyLimits::aggressive()] {
            assert!(limits.validate().is_ok());
        }

        let invalid = SafetyLimits {
            max_uncertainty: 1.5,
            ..SafetyLimits::moderate()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_evaluate_flags() {
        let limits = SafetyLimits::moderate();
        let calm = LimitSnapshot {
            confidence: 0.8,
            uncertainty: 0.2,
            change_probability: 0.05,
            reward_drawdown: 0.05,
            sample_count: 500,
        };
        assert!(limits.evaluate(&calm).is_clear());

        let stressed = LimitSnapshot {
            confidence: 0.1,
            uncertainty: 0.9,
            change_probability: 0.8,
            reward_drawdown: 0.4,
            sample_count: 10,
        };
        let flags = limits.evaluate(&stressed);
        assert!(flags.warming_up && flags.low_confidence && flags.high_uncertainty);
        assert!(flags.regime_unstable && flags.drawdown_breached);
        assert_eq!(flags.active().len(), 5);
    }
}
