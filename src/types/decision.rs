use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ml::regime::RegimeState;
use crate::ml::FeatureImportance;
use crate::safety::GateStatus;

/// Read-only diagnostics for the downstream risk layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyFlags {
    pub warming_up: bool,
    pub low_confidence: bool,
    pub high_uncertainty: bool,
    pub regime_unstable: bool,
    pub drawdown_breached: bool,
    /// Outcome of a safety-gate evaluation that ran on this tick
    pub gate_status: Option<GateStatus>,
    pub policy_updated: bool,
}

impl SafetyFlags {
    pub fn is_clear(&self) -> bool {
        self.active().is_empty()
    }

    pub fn active(&self) -> Vec<&'static str> {
        let mut active = Vec::new();
        if self.warming_up {
            active.push("warming_up");
        }
        if self.low_confidence {
            active.push("low_confidence");
        }
        if self.high_uncertainty {
            active.push("high_uncertainty");
        }
        if self.regime_unstable {
            active.push("regime_unstable");
        }
        if self.drawdown_breached {
            active.push("drawdown_breached");
        }
        active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaDecision {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub selected_strategy: String,
    pub confidence: f64,
    pub uncertainty: f64,
    pub prediction: f64,
    pub regime: RegimeState,
    pub change_probability: f64,
    pub bandit_score: f64,
    pub safety_flags: SafetyFlags,
    pub selected_features: Vec<String>,
    pub feature_importance: Vec<FeatureImportance>,
    pub rationale: String,
}

impl MetaDecision {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn is_actionable(&self) -> bool {
        !self.safety_flags.warming_up && !self.safety_flags.regime_unstable
    }
}
