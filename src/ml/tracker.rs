use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Summary of one strategy's realized rewards in the tracked window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub count: usize,
    pub total: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// mean / std, 0 when the window has no spread
    pub sharpe: f64,
    pub win_rate: f64,
    /// Largest peak-to-trough fall of the cumulative reward
    pub max_drawdown: f64,
    /// Distance of the cumulative reward below its running peak
    pub current_drawdown: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    pub per_strategy: BTreeMap<String, Vec<f64>>,
    pub combined: Vec<f64>,
}

/// Bounded reward history per strategy, plus one combined stream in
/// settlement order.
pub struct PerformanceTracker {
    capacity: usize,
    per_strategy: BTreeMap<String, VecDeque<f64>>,
    combined: VecDeque<f64>,
}

impl PerformanceTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            per_strategy: BTreeMap::new(),
            combined: VecDeque::new(),
        }
    }

    /// Record a settled reward
    pub fn record(&mut self, strategy_id: &str, reward: f64) {
        let history = self.per_strategy.entry(strategy_id.to_string()).or_default();
        history.push_back(reward);
        if history.len() > self.capacity {
            history.pop_front();
        }
        self.combined.push_back(reward);
        if self.combined.len() > self.capacity {
            self.combined.pop_front();
        }
        debug!("Performance tracker: {} reward {:.4} ({} recorded)", strategy_id, reward, history.len());
    }

    /// Most recent rewards for a strategy, newest first
    pub fn recent(&self, strategy_id: &str, n: usize) -> Vec<f64> {
        self.per_strategy
            .get(strategy_id)
            .map(|h| h.iter().rev().take(n).copied().collect())
            .unwrap_or_default()
    }

    pub fn summary(&self, strategy_id: &str) -> Option<PerformanceSummary> {
        self.per_strategy
            .get(strategy_id)
            .filter(|h| !h.is_empty())
            .map(|h| summarize(h.iter().copied()))
    }

    pub fn summaries(&self) -> BTreeMap<String, PerformanceSummary> {
        self.per_strategy
            .iter()
            .filter(|(_, h)| !h.is_empty())
            .map(|(id, h)| (id.clone(), summarize(h.iter().copied())))
            .collect()
    }

    /// Mean of the newer half minus mean of the older half of the last
    /// `window` combined rewards. None until at least 4 rewards exist.
    pub fn reward_trend(&self, window: usize) -> Option<f64> {
        let n = window.min(self.combined.len());
        if n < 4 {
            return None;
        }
        let recent: Vec<f64> = self.combined.iter().skip(self.combined.len() - n).copied().collect();
        let (older, newer) = recent.split_at(n / 2);
        let avg = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
        Some(avg(newer) - avg(older))
    }

    pub fn strategy_count(&self) -> usize {
        self.per_strategy.len()
    }

    pub fn total_recorded(&self) -> usize {
        self.combined.len()
    }

    pub fn remove_strategy(&mut self, strategy_id: &str) {
        self.per_strategy.remove(strategy_id);
    }

    pub fn reset(&mut self) {
        self.per_strategy.clear();
        self.combined.clear();
    }

    pub fn export_state(&self) -> TrackerState {
        TrackerState {
            per_strategy: self
                .per_strategy
                .iter()
                .map(|(id, h)| (id.clone(), h.iter().copied().collect()))
                .collect(),
            combined: self.combined.iter().copied().collect(),
        }
    }

    pub fn import_state(&mut self, state: TrackerState) {
        let capacity = self.capacity;
        let bounded = |values: Vec<f64>| -> VecDeque<f64> {
            let skip = values.len().saturating_sub(capacity);
            values.into_iter().skip(skip).collect()
        };
        self.per_strategy = state
            .per_strategy
            .into_iter()
            .map(|(id, values)| (id, bounded(values)))
            .collect();
        self.combined = bounded(state.combined);
    }
}

fn summarize(rewards: impl Iterator<Item = f64>) -> PerformanceSummary {
    let mut count = 0usize;
    let mut total = 0.0;
    let mut sum_sq = 0.0;
    let mut wins = 0usize;
    let mut cumulative = 0.0;
    let mut peak = 0.0f64;
    let mut max_drawdown = 0.0f64;

    for reward in rewards {
        count += 1;
        total += reward;
        sum_sq += reward * reward;
        if reward > 0.0 {
            wins += 1;
        }
        cumulative += reward;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }

    if count == 0 {
        return PerformanceSummary::default();
    }

    let mean = total / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    let std_dev = variance.sqrt();
    let sharpe = if std_dev > 1e-12 { mean / std_dev } else { 0.0 };

    PerformanceSummary {
        count,
        total,
        mean,
        std_dev,
        sharpe,
        win_rate: wins as f64 / count as f64,
        max_drawdown,
        current_drawdown: peak - cumulative,
    }
}
