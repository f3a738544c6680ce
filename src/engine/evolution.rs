use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ml::PerformanceSummary;

/// Multi-objective snapshot of one strategy, handed to the evolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub mean_reward: f64,
    pub sharpe: f64,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub trades: usize,
}

impl From<PerformanceSummary> for StrategyPerformance {
    fn from(summary: PerformanceSummary) -> Self {
        Self {
            mean_reward: summary.mean,
            sharpe: summary.sharpe,
            win_rate: summary.win_rate,
            max_drawdown: summary.max_drawdown,
            trades: summary.count,
        }
    }
}

impl StrategyPerformance {
    /// True if `self` is at least as good on every objective and strictly
    /// better on one.
    pub fn dominates(&self, other: &StrategyPerformance) -> bool {
        let no_worse = self.mean_reward >= other.mean_reward
            && self.sharpe >= other.sharpe
            && self.win_rate >= other.win_rate
            && self.max_drawdown <= other.max_drawdown;
        let better = self.mean_reward > other.mean_reward
            || self.sharpe > other.sharpe
            || self.win_rate > other.win_rate
            || self.max_drawdown < other.max_drawdown;
        no_worse && better
    }
}

/// Changes to the strategy set requested by an evolver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvolutionReport {
    pub promoted: Vec<String>,
    pub retired: Vec<String>,
}

impl EvolutionReport {
    pub fn is_empty(&self) -> bool {
        self.promoted.is_empty() && self.retired.is_empty()
    }
}

/// External multi-objective strategy evolution
#[cfg_attr(test, mockall::automock)]
pub trait StrategyEvolver {
    fn evolve(&mut self, generation: u64, performances: &BTreeMap<String, StrategyPerformance>) -> EvolutionReport;
}

/// Leaves the strategy set unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvolver;

impl StrategyEvolver for NoopEvolver {
    fn evolve(&mut self, _generation: u64, _performances: &BTreeMap<String, StrategyPerformance>) -> EvolutionReport {
        EvolutionReport::default()
    }
}

/// Retires strategies that another strategy Pareto-dominates once both have
/// at least `min_trades` settled rewards.
#[derive(Debug, Clone, Copy)]
pub struct ParetoEvolver {
    pub min_trades: usize,
}

impl Default for ParetoEvolver {
    fn default() -> Self {
        Self { min_trades: 30 }
    }
}

impl StrategyEvolver for ParetoEvolver {
    fn evolve(&mut self, _generation: u64, performances: &BTreeMap<String, StrategyPerformance>) -> EvolutionReport {
        let eligible: Vec<(&String, &StrategyPerformance)> = performances
            .iter()
            .filter(|(_, p)| p.trades >= self.min_trades)
            .collect();

        let retired = eligible
            .iter()
            .filter(|(_, p)| eligible.iter().any(|(_, other)| other.dominates(p)))
            .map(|(id, _)| (*id).clone())
            .collect();

        EvolutionReport {
            promoted: Vec::new(),
            retired,
        }
    }
}
