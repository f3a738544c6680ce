use serde::{Deserialize, Serialize};

use super::runtime::ControllerConfig;
use crate::risk::SafetyLimits;

/// Controller presets trading exploration against caution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerProfile {
    /// Slow to adapt, strict policy gate, tight safety limits.
    Conservative,

    /// Defaults used by `ControllerConfig::default()`.
    Balanced,

    /// Wide exploration bonus and quick regime reaction.
    /// Suited to paper sessions and new strategy sets.
    Exploratory,

    /// User-defined settings
    Custom,
}

impl ControllerProfile {
    pub fn name(&self) -> &str {
        match self {
            Self::Conservative => "Conservative",
            Self::Balanced => "Balanced",
            Self::Exploratory => "Exploratory",
            Self::Custom => "Custom",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Conservative =>
                "Low exploration, 2000-resample policy gate, conservative safety limits.",
            Self::Balanced =>
                "UCB with sqrt(2) exploration, 1000-resample gate, moderate limits.",
            Self::Exploratory =>
                "High exploration and fast hazard; gate still enforced but more tolerant.",
            Self::Custom =>
                "User-defined custom settings.",
        }
    }

    pub fn all() -> [ControllerProfile; 3] {
        [Self::Conservative, Self::Balanced, Self::Exploratory]
    }

    /// Case-insensitive lookup of a preset by name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .into_iter()
            .chain(std::iter::once(Self::Custom))
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// Build a full config for this profile. `Custom` yields the defaults
    /// tagged as custom, to be overridden by the caller.
    pub fn to_config(&self) -> ControllerConfig {
        let mut config = ControllerConfig::default();
        config.profile = *self;

        match self {
            Self::Conservative => {
                config.bandit.exploration_constant = 0.7;
                config.bandit.min_exploration_period = 30;
                config.regime.hazard_rate = 0.005;
                config.safety.bootstrap_samples = 2000;
                config.safety.safety_threshold = 0.95;
                config.safety.risk_tolerance_ratio = 0.02;
                config.safety.max_policy_deviation = 0.2;
                config.limits = SafetyLimits::conservative();
            }
            Self::Balanced | Self::Custom => {}
            Self::Exploratory => {
                config.bandit.exploration_constant = 2.5;
                config.bandit.min_exploration_period = 10;
                config.bandit.decay_rate = 0.97;
                config.regime.hazard_rate = 0.02;
                config.safety.safety_threshold = 0.8;
                config.safety.risk_tolerance_ratio = 0.1;
                config.limits = SafetyLimits::aggressive();
            }
        }

        config
    }
}

impl Default for ControllerProfile {
    fn default() -> Self {
        Self::Balanced
    }
}
