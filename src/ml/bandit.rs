use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::BanditSettings;
use crate::error::{ensure_finite, CoreError, Result};

/// Per-strategy arm statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    pub id: String,
    pub cumulative_reward: f64,
    /// Times the arm was selected. Never decreases while the arm exists.
    pub pull_count: u64,
    /// Rewards received; settlement can lag selection
    pub reward_count: u64,
    pub average_reward: f64,
    pub confidence_width: f64,
    pub last_selected: Option<DateTime<Utc>>,
}

impl BanditArm {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            cumulative_reward: 0.0,
            pull_count: 0,
            reward_count: 0,
            average_reward: 0.0,
            confidence_width: 0.0,
            last_selected: None,
        }
    }

    fn clear_stats(&mut self) {
        *self = Self::new(&self.id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BanditPhase {
    ForcedExploration,
    Ucb,
}

impl std::fmt::Display for BanditPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BanditPhase::ForcedExploration => write!(f, "forced exploration"),
            BanditPhase::Ucb => write!(f, "UCB"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditSelection {
    pub arm_id: String,
    pub phase: BanditPhase,
    pub estimated_reward: f64,
    pub exploration_bonus: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub arm_id: String,
    pub reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditState {
    pub arms: Vec<BanditArm>,
    pub history: Vec<RewardRecord>,
    pub total_actions: u64,
    pub exploration_constant: f64,
}

/// UCB strategy selector with a forced round-robin warm-up.
///
/// Arms keep registration order, which is also the tie-break order in both
/// phases.
pub struct StrategyBandit {
    settings: BanditSettings,
    exploration_constant: f64,
    arms: Vec<BanditArm>,
    history: VecDeque<RewardRecord>,
    total_actions: u64,
}

impl StrategyBandit {
    pub fn new(settings: BanditSettings) -> Self {
        Self {
            exploration_constant: settings.exploration_constant,
            settings,
            arms: Vec::new(),
            history: VecDeque::new(),
            total_actions: 0,
        }
    }

    pub fn with_arms<S: AsRef<str>>(settings: BanditSettings, arm_ids: &[S]) -> Self {
        let mut bandit = Self::new(settings);
        for id in arm_ids {
            bandit.add_arm(id.as_ref());
        }
        bandit
    }

    /// Register an arm. Returns false if the id already exists.
    pub fn add_arm(&mut self, arm_id: &str) -> bool {
        if self.arm_index(arm_id).is_some() {
            return false;
        }
        self.arms.push(BanditArm::new(arm_id));
        info!("Bandit: added arm '{}' ({} arms)", arm_id, self.arms.len());
        true
    }

    /// Remove an arm and purge its reward history.
    pub fn remove_arm(&mut self, arm_id: &str) -> Result<BanditArm> {
        let idx = self
            .arm_index(arm_id)
            .ok_or_else(|| CoreError::UnknownArm(arm_id.to_string()))?;
        let arm = self.arms.remove(idx);
        self.history.retain(|record| record.arm_id != arm_id);
        self.trim_history();
        info!("Bandit: removed arm '{}' ({} arms left)", arm_id, self.arms.len());
        Ok(arm)
    }

    fn arm_index(&self, arm_id: &str) -> Option<usize> {
        self.arms.iter().position(|arm| arm.id == arm_id)
    }

    pub fn phase(&self) -> BanditPhase {
        self.phase_at(self.total_actions + 1)
    }

    fn phase_at(&self, action: u64) -> BanditPhase {
        let forced = self.arms.len() as u64 * self.settings.min_exploration_period;
        if action <= forced {
            BanditPhase::ForcedExploration
        } else {
            BanditPhase::Ucb
        }
    }

    pub fn select_arm(&mut self) -> Result<BanditSelection> {
        self.select_arm_at(Utc::now())
    }

    pub fn select_arm_at(&mut self, timestamp: DateTime<Utc>) -> Result<BanditSelection> {
        if self.arms.is_empty() {
            return Err(CoreError::NoArmAvailable);
        }
        self.total_actions += 1;
        let phase = self.phase_at(self.total_actions);
        let log_total = (self.total_actions as f64).ln();

        let idx = match phase {
            BanditPhase::ForcedExploration => {
                let mut best = 0;
                for (i, arm) in self.arms.iter().enumerate() {
                    if arm.pull_count < self.arms[best].pull_count {
                        best = i;
                    }
                }
                best
            }
            BanditPhase::Ucb => {
                // Unpulled arms (added after warm-up) go first
                match self.arms.iter().position(|arm| arm.pull_count == 0) {
                    Some(i) => i,
                    None => {
                        let mut best = 0;
                        let mut best_score = f64::NEG_INFINITY;
                        for i in 0..self.arms.len() {
                            let score = self.weighted_reward(i) + self.bonus(i, log_total);
                            if score > best_score {
                                best = i;
                                best_score = score;
                            }
                        }
                        best
                    }
                }
            }
        };

        let estimated_reward = self.weighted_reward(idx);
        let exploration_bonus = self.bonus(idx, log_total);

        let arm = &mut self.arms[idx];
        arm.pull_count += 1;
        arm.last_selected = Some(timestamp);
        arm.confidence_width = self.exploration_constant * (log_total / arm.pull_count as f64).sqrt();

        let selection = BanditSelection {
            arm_id: arm.id.clone(),
            phase,
            estimated_reward,
            exploration_bonus,
            score: estimated_reward + exploration_bonus,
        };
        debug!(
            "Bandit ({}): selected '{}' score={:.4} (reward {:.4} + bonus {:.4})",
            selection.phase, selection.arm_id, selection.score, estimated_reward, exploration_bonus
        );
        Ok(selection)
    }

    /// Exploration bonus; an unpulled arm is scored as if pulled once.
    fn bonus(&self, idx: usize, log_total: f64) -> f64 {
        let pulls = self.arms[idx].pull_count.max(1) as f64;
        self.exploration_constant * (log_total.max(0.0) / pulls).sqrt()
    }

    /// Recency-weighted mean of the arm's rewards still in the sliding
    /// history, newest weighted 1, then `decay_rate`, `decay_rate^2`, ...
    /// Falls back to the lifetime average once the history has no entries.
    fn weighted_reward(&self, idx: usize) -> f64 {
        let arm = &self.arms[idx];
        let mut weight = 1.0;
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for record in self.history.iter().rev().filter(|r| r.arm_id == arm.id) {
            weighted_sum += weight * record.reward;
            total_weight += weight;
            weight *= self.settings.decay_rate;
        }
        if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            arm.average_reward
        }
    }

    pub fn update_reward(&mut self, arm_id: &str, reward: f64) -> Result<()> {
        ensure_finite("reward", reward)?;
        let idx = self
            .arm_index(arm_id)
            .ok_or_else(|| CoreError::UnknownArm(arm_id.to_string()))?;

        let arm = &mut self.arms[idx];
        arm.cumulative_reward += reward;
        arm.reward_count += 1;
        arm.average_reward = arm.cumulative_reward / arm.reward_count as f64;

        self.history.push_back(RewardRecord {
            arm_id: arm_id.to_string(),
            reward,
        });
        self.trim_history();
        Ok(())
    }

    fn history_capacity(&self) -> usize {
        self.settings.reward_window * self.arms.len()
    }

    fn trim_history(&mut self) {
        let capacity = self.history_capacity();
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }

    /// Scale the exploration constant, clamped to the configured bounds.
    pub fn adjust_exploration(&mut self, factor: f64) -> f64 {
        self.exploration_constant = (self.exploration_constant * factor).clamp(
            self.settings.min_exploration_constant,
            self.settings.max_exploration_constant,
        );
        self.exploration_constant
    }

    pub fn exploration_constant(&self) -> f64 {
        self.exploration_constant
    }

    pub fn arms(&self) -> &[BanditArm] {
        &self.arms
    }

    pub fn arm(&self, arm_id: &str) -> Option<&BanditArm> {
        self.arm_index(arm_id).map(|i| &self.arms[i])
    }

    pub fn arm_count(&self) -> usize {
        self.arms.len()
    }

    pub fn total_actions(&self) -> u64 {
        self.total_actions
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Clear statistics; the arm set is kept.
    pub fn reset(&mut self) {
        for arm in &mut self.arms {
            arm.clear_stats();
        }
        self.history.clear();
        self.total_actions = 0;
        self.exploration_constant = self.settings.exploration_constant;
    }

    pub fn export_state(&self) -> BanditState {
        BanditState {
            arms: self.arms.clone(),
            history: self.history.iter().cloned().collect(),
            total_actions: self.total_actions,
            exploration_constant: self.exploration_constant,
        }
    }

    pub fn import_state(&mut self, state: BanditState) -> Result<()> {
        for record in &state.history {
            if !state.arms.iter().any(|arm| arm.id == record.arm_id) {
                return Err(CoreError::InvalidSnapshot(format!(
                    "bandit: history references unknown arm '{}'",
                    record.arm_id
                )));
            }
        }
        self.arms = state.arms;
        self.history = state.history.into_iter().collect();
        self.total_actions = state.total_actions;
        self.exploration_constant = state.exploration_constant.clamp(
            self.settings.min_exploration_constant,
            self.settings.max_exploration_constant,
        );
        self.trim_history();
        Ok(())
    }
}
