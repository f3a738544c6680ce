use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, Result};

/// Named feature values. Ordered so every pass over a tick is deterministic.
pub type FeatureMap = BTreeMap<String, f64>;

/// One tick of market features plus the realized target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureObservation {
    pub features: FeatureMap,
    pub target: f64,
    pub timestamp: DateTime<Utc>,
}

impl FeatureObservation {
    pub fn new(features: FeatureMap, target: f64) -> Self {
        Self {
            features,
            target,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build from `(name, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>, target: f64) -> Self {
        let features = pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Self::new(features, target)
    }

    /// Reject the whole tick if any value is NaN or infinite.
    pub fn validate(&self) -> Result<()> {
        ensure_finite("target", self.target)?;
        for (name, value) in &self.features {
            ensure_finite(name, *value)?;
        }
        Ok(())
    }

    /// Copy of this observation restricted to the given feature ids.
    pub fn restricted_to(&self, feature_ids: &[String]) -> FeatureMap {
        feature_ids
            .iter()
            .filter_map(|id| self.features.get(id).map(|v| (id.clone(), *v)))
            .collect()
    }
}
