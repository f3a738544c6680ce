use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FeatureSelectionSettings;
use crate::error::{CoreError, Result};
use crate::types::FeatureObservation;

const VARIANCE_EPSILON: f64 = 1e-12;

/// Exponentially weighted first and second moments of an `(x, y)` pair.
/// The adaptive rate `1 / min(count, window)` makes the first `window`
/// samples an exact running average before the estimator starts to forget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationStats {
    pub count: u64,
    mean_x: f64,
    mean_y: f64,
    mean_xx: f64,
    mean_yy: f64,
    mean_xy: f64,
}

impl CorrelationStats {
    pub fn update(&mut self, x: f64, y: f64, window_size: usize) {
        self.count += 1;
        let rate = 1.0 / self.count.min(window_size.max(1) as u64) as f64;
        self.mean_x += rate * (x - self.mean_x);
        self.mean_y += rate * (y - self.mean_y);
        self.mean_xx += rate * (x * x - self.mean_xx);
        self.mean_yy += rate * (y * y - self.mean_yy);
        self.mean_xy += rate * (x * y - self.mean_xy);
    }

    /// Pearson correlation, 0 when either side has no variance.
    pub fn correlation(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let var_x = self.mean_xx - self.mean_x * self.mean_x;
        let var_y = self.mean_yy - self.mean_y * self.mean_y;
        if var_x <= VARIANCE_EPSILON || var_y <= VARIANCE_EPSILON {
            return 0.0;
        }
        let cov = self.mean_xy - self.mean_x * self.mean_y;
        (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
    }
}

/// mRMR score breakdown for one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature_id: String,
    pub relevance: f64,
    pub redundancy: f64,
    pub mrmr_score: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePairStats {
    pub first: String,
    pub second: String,
    pub stats: CorrelationStats,
}

/// Snapshot handed to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSelectorState {
    pub feature_ids: Vec<String>,
    pub relevance: Vec<CorrelationStats>,
    pub last_updated: Vec<DateTime<Utc>>,
    pub pairs: Vec<FeaturePairStats>,
    pub sample_count: u64,
}

/// Streaming minimum-redundancy maximum-relevance feature scorer.
///
/// Features are interned in first-seen order; that order breaks score ties,
/// so the selection is a pure function of the observation history.
pub struct FeatureSelector {
    settings: FeatureSelectionSettings,
    feature_ids: Vec<String>,
    index: HashMap<String, usize>,
    relevance: Vec<CorrelationStats>,
    last_updated: Vec<DateTime<Utc>>,
    // keyed by (lower index, higher index)
    redundancy: HashMap<(usize, usize), CorrelationStats>,
    ranked: Vec<FeatureImportance>,
    sample_count: u64,
}

impl FeatureSelector {
    pub fn new(settings: FeatureSelectionSettings) -> Self {
        Self {
            settings,
            feature_ids: Vec::new(),
            index: HashMap::new(),
            relevance: Vec::new(),
            last_updated: Vec::new(),
            redundancy: HashMap::new(),
            ranked: Vec::new(),
            sample_count: 0,
        }
    }

    /// Fold one observation into the running statistics and return the
    /// current top-K feature ids, best first.
    pub fn update(&mut self, observation: &FeatureObservation) -> Vec<String> {
        self.sample_count += 1;
        let window = self.settings.window_size;
        let target = observation.target;

        let mut present: Vec<(usize, f64)> = Vec::with_capacity(observation.features.len());
        for (feature_id, &value) in &observation.features {
            let idx = self.intern(feature_id, observation.timestamp);
            self.relevance[idx].update(value, target, window);
            self.last_updated[idx] = observation.timestamp;
            present.push((idx, value));
        }

        for (i, &(a, x_a)) in present.iter().enumerate() {
            for &(b, x_b) in &present[i + 1..] {
                let (key, (x, y)) = if a < b { ((a, b), (x_a, x_b)) } else { ((b, a), (x_b, x_a)) };
                self.redundancy.entry(key).or_default().update(x, y, window);
            }
        }

        self.rerank();
        self.selected()
    }

    fn intern(&mut self, feature_id: &str, timestamp: DateTime<Utc>) -> usize {
        if let Some(&idx) = self.index.get(feature_id) {
            return idx;
        }
        let idx = self.feature_ids.len();
        self.feature_ids.push(feature_id.to_string());
        self.index.insert(feature_id.to_string(), idx);
        self.relevance.push(CorrelationStats::default());
        self.last_updated.push(timestamp);
        debug!("Feature selector: new feature '{}' (#{})", feature_id, idx);
        idx
    }

    fn mean_redundancy(&self, idx: usize) -> f64 {
        let mut total = 0.0;
        let mut pairs = 0usize;
        for other in 0..self.feature_ids.len() {
            if other == idx {
                continue;
            }
            let key = if idx < other { (idx, other) } else { (other, idx) };
            if let Some(stats) = self.redundancy.get(&key) {
                total += stats.correlation().abs();
                pairs += 1;
            }
        }
        if pairs == 0 {
            0.0
        } else {
            total / pairs as f64
        }
    }

    fn rerank(&mut self) {
        let mut scored: Vec<FeatureImportance> = (0..self.feature_ids.len())
            .map(|idx| {
                let relevance = self.relevance[idx].correlation();
                let redundancy = self.mean_redundancy(idx);
                let mrmr_score = self.settings.relevance_weight * relevance.abs()
                    - self.settings.redundancy_weight * redundancy;
                FeatureImportance {
                    feature_id: self.feature_ids[idx].clone(),
                    relevance,
                    redundancy,
                    mrmr_score,
                    last_updated: self.last_updated[idx],
                }
            })
            .collect();

        // Stable sort keeps first-seen order among equal scores
        scored.sort_by(|a, b| b.mrmr_score.total_cmp(&a.mrmr_score));
        self.ranked = scored;
    }

    /// Top-K feature ids from the last update
    pub fn selected(&self) -> Vec<String> {
        self.ranked
            .iter()
            .take(self.settings.top_k)
            .map(|imp| imp.feature_id.clone())
            .collect()
    }

    /// All known features ranked by mRMR score
    pub fn importances(&self) -> &[FeatureImportance] {
        &self.ranked
    }

    pub fn top_importances(&self, k: usize) -> Vec<FeatureImportance> {
        self.ranked.iter().take(k).cloned().collect()
    }

    pub fn feature_count(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn reset(&mut self) {
        self.feature_ids.clear();
        self.index.clear();
        self.relevance.clear();
        self.last_updated.clear();
        self.redundancy.clear();
        self.ranked.clear();
        self.sample_count = 0;
    }

    pub fn export_state(&self) -> FeatureSelectorState {
        let mut pairs: Vec<FeaturePairStats> = self
            .redundancy
            .iter()
            .map(|(&(a, b), stats)| FeaturePairStats {
                first: self.feature_ids[a].clone(),
                second: self.feature_ids[b].clone(),
                stats: stats.clone(),
            })
            .collect();
        // HashMap order is not stable; snapshots should be
        pairs.sort_by(|x, y| (&x.first, &x.second).cmp(&(&y.first, &y.second)));

        FeatureSelectorState {
            feature_ids: self.feature_ids.clone(),
            relevance: self.relevance.clone(),
            last_updated: self.last_updated.clone(),
            pairs,
            sample_count: self.sample_count,
        }
    }

    pub fn import_state(&mut self, state: FeatureSelectorState) -> Result<()> {
        let n = state.feature_ids.len();
        if state.relevance.len() != n || state.last_updated.len() != n {
            return Err(CoreError::InvalidSnapshot(format!(
                "feature selector: {} ids, {} relevance stats, {} timestamps",
                n,
                state.relevance.len(),
                state.last_updated.len()
            )));
        }

        let index: HashMap<String, usize> = state
            .feature_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        if index.len() != n {
            return Err(CoreError::InvalidSnapshot("feature selector: duplicate feature ids".to_string()));
        }

        let mut redundancy = HashMap::with_capacity(state.pairs.len());
        for pair in state.pairs {
            let (a, b) = match (index.get(&pair.first), index.get(&pair.second)) {
                (Some(&a), Some(&b)) if a != b => (a, b),
                _ => {
                    return Err(CoreError::InvalidSnapshot(format!(
                        "feature selector: bad pair ({}, {})",
                        pair.first, pair.second
                    )))
                }
            };
            let key = if a < b { (a, b) } else { (b, a) };
            redundancy.insert(key, pair.stats);
        }

        self.feature_ids = state.feature_ids;
        self.index = index;
        self.relevance = state.relevance;
        self.last_updated = state.last_updated;
        self.redundancy = redundancy;
        self.sample_count = state.sample_count;
        self.rerank();
        Ok(())
    }
}
