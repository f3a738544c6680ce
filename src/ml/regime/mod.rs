pub mod detector;

pub use detector::{RegimeDetector, RegimeDetectorState, RegimeStats, RegimeSummary, RunLengthUpdate};

use serde::{Deserialize, Serialize};

/// Market regime label derived from the dominant run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeState {
    Bull = 0,
    Bear = 1,
    Neutral = 2,
    /// A change point is likely within the last few observations
    Transition = 3,
}

impl RegimeState {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(RegimeState::Bull),
            1 => Some(RegimeState::Bear),
            2 => Some(RegimeState::Neutral),
            3 => Some(RegimeState::Transition),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RegimeState::Bull => "Bull",
            RegimeState::Bear => "Bear",
            RegimeState::Neutral => "Neutral",
            RegimeState::Transition => "Transition",
        }
    }
}

impl std::fmt::Display for RegimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
