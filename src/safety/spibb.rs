use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::episodes::{EpisodeBuffer, HistoricalEpisode};
use super::policy::{Policy, PolicyAction};
use crate::config::SafetyGateSettings;
use crate::error::{ensure_finite, Result};

/// Largest share of the candidate that a blend may carry.
const MAX_BLEND_RATIO: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintViolation {
    BelowMinimumReturn { expected: f64, minimum: f64 },
    ExcessiveDegradation { candidate: f64, floor: f64 },
    ExcessiveDeviation { deviation: f64, limit: f64 },
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintViolation::BelowMinimumReturn { expected, minimum } => {
                write!(f, "expected return {:.4} below minimum {:.4}", expected, minimum)
            }
            ConstraintViolation::ExcessiveDegradation { candidate, floor } => {
                write!(f, "candidate {:.4} degrades below floor {:.4}", candidate, floor)
            }
            ConstraintViolation::ExcessiveDeviation { deviation, limit } => {
                write!(f, "policy deviation {:.3} exceeds limit {:.3}", deviation, limit)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateStatus {
    InsufficientData,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    pub status: GateStatus,
    pub is_update_safe: bool,
    /// The new baseline on approval, otherwise the unchanged baseline
    pub updated_policy: Policy,
    pub safety_margin: f64,
    pub baseline_estimate: f64,
    pub candidate_estimate: f64,
    pub baseline_lower_bound: f64,
    pub candidate_lower_bound: f64,
    pub performance_improvement: f64,
    pub blend_ratio: f64,
    pub violations: Vec<ConstraintViolation>,
    pub episodes_used: usize,
    pub resamples: usize,
    pub evaluated_at: DateTime<Utc>,
}

impl SafetyAssessment {
    fn insufficient(baseline: &Policy) -> Self {
        Self {
            status: GateStatus::InsufficientData,
            is_update_safe: false,
            updated_policy: baseline.clone(),
            safety_margin: 0.0,
            baseline_estimate: 0.0,
            candidate_estimate: 0.0,
            baseline_lower_bound: 0.0,
            candidate_lower_bound: 0.0,
            performance_improvement: 0.0,
            blend_ratio: 0.0,
            violations: Vec::new(),
            episodes_used: 0,
            resamples: 0,
            evaluated_at: Utc::now(),
        }
    }
}

/// Caps on the bootstrap loop. The loop always runs at least one resample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapBudget {
    pub max_resamples: usize,
    pub max_duration: Option<Duration>,
}

impl BootstrapBudget {
    pub fn from_settings(settings: &SafetyGateSettings) -> Self {
        Self {
            max_resamples: settings.bootstrap_samples,
            max_duration: settings.bootstrap_budget_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyGateState {
    pub baseline: Policy,
    pub episodes: Vec<HistoricalEpisode>,
    pub evaluations: u64,
    pub approvals: u64,
}

#[derive(Debug, Clone, Copy)]
struct BootstrapSummary {
    baseline_mean: f64,
    candidate_mean: f64,
    baseline_lower_bound: f64,
    candidate_lower_bound: f64,
    safety_margin: f64,
    resamples: usize,
}

/// Safe policy improvement gate over a baseline snapshot.
///
/// Off-policy values use action-matched importance weighting with the
/// baseline as the behaviour policy: an episode whose recorded action the
/// baseline prescribes counts its full reward for the baseline, and
/// `reward * p_candidate / p_behaviour` (capped) for a candidate that
/// prescribes the same action. Episodes a policy does not match contribute 0.
pub struct SafetyGate {
    settings: SafetyGateSettings,
    initial_baseline: Policy,
    baseline: Policy,
    episodes: EpisodeBuffer,
    rng: StdRng,
    evaluations: u64,
    approvals: u64,
}

impl SafetyGate {
    pub fn new(settings: SafetyGateSettings, baseline: Policy) -> Self {
        Self {
            episodes: EpisodeBuffer::new(settings.max_history),
            rng: StdRng::seed_from_u64(settings.seed),
            initial_baseline: baseline.clone(),
            baseline,
            settings,
            evaluations: 0,
            approvals: 0,
        }
    }

    pub fn baseline(&self) -> &Policy {
        &self.baseline
    }

    /// Baseline the gate was built with, restored by `reset()`
    pub fn initial_baseline(&self) -> &Policy {
        &self.initial_baseline
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn has_sufficient_data(&self) -> bool {
        self.episodes.len() >= self.settings.min_dataset_size
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn approvals(&self) -> u64 {
        self.approvals
    }

    pub fn record_episode(&mut self, episode: HistoricalEpisode) -> Result<()> {
        ensure_finite("episode.reward", episode.reward)?;
        self.episodes.push(episode);
        Ok(())
    }

    pub fn propose_update(&mut self, candidate: &Policy) -> SafetyAssessment {
        let budget = BootstrapBudget::from_settings(&self.settings);
        self.propose_update_within(candidate, budget)
    }

    pub fn propose_update_within(&mut self, candidate: &Policy, budget: BootstrapBudget) -> SafetyAssessment {
        self.evaluations += 1;

        if !self.has_sufficient_data() || self.episodes.is_empty() {
            debug!(
                "SafetyGate: insufficient data ({}/{} episodes), keeping baseline",
                self.episodes.len(),
                self.settings.min_dataset_size
            );
            return SafetyAssessment::insufficient(&self.baseline);
        }

        let (baseline_values, candidate_values) = self.episode_values(candidate);
        let sample_size = self.episodes.len().min(self.settings.min_dataset_size).max(1);
        let summary = self.bootstrap(&baseline_values, &candidate_values, sample_size, budget);

        let violations = self.check_constraints(candidate, &summary);
        let lower_bound_ok = summary.candidate_lower_bound > summary.baseline_lower_bound;
        let is_update_safe =
            violations.is_empty() && summary.safety_margin > self.settings.safety_threshold && lower_bound_ok;

        let mut assessment = SafetyAssessment {
            status: GateStatus::Rejected,
            is_update_safe,
            updated_policy: self.baseline.clone(),
            safety_margin: summary.safety_margin,
            baseline_estimate: summary.baseline_mean,
            candidate_estimate: summary.candidate_mean,
            baseline_lower_bound: summary.baseline_lower_bound,
            candidate_lower_bound: summary.candidate_lower_bound,
            performance_improvement: summary.candidate_mean - summary.baseline_mean,
            blend_ratio: 0.0,
            violations,
            episodes_used: sample_size,
            resamples: summary.resamples,
            evaluated_at: Utc::now(),
        };

        if is_update_safe {
            let confidence_ratio = if summary.candidate_mean > 0.0 {
                (summary.candidate_lower_bound / summary.candidate_mean).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let blend_ratio = (confidence_ratio * summary.safety_margin).min(MAX_BLEND_RATIO);
            let blended = blend_policies(&self.baseline, candidate, blend_ratio);

            self.baseline = blended.clone();
            self.approvals += 1;
            assessment.status = GateStatus::Approved;
            assessment.blend_ratio = blend_ratio;
            assessment.updated_policy = blended;

            info!(
                "SafetyGate: update approved (margin {:.3}, improvement {:+.4}, blend {:.2})",
                summary.safety_margin, assessment.performance_improvement, blend_ratio
            );
        } else {
            for violation in &assessment.violations {
                warn!("SafetyGate: {}", violation);
            }
            if !lower_bound_ok {
                warn!(
                    "SafetyGate: candidate lower bound {:.4} <= baseline {:.4}",
                    summary.candidate_lower_bound, summary.baseline_lower_bound
                );
            }
            info!(
                "SafetyGate: update rejected (margin {:.3} vs threshold {:.3})",
                summary.safety_margin, self.settings.safety_threshold
            );
        }

        assessment
    }

    /// Per-episode contribution to the baseline and candidate values.
    fn episode_values(&self, candidate: &Policy) -> (Vec<f64>, Vec<f64>) {
        let cap = self.settings.max_importance_weight;
        self.episodes
            .iter()
            .map(|episode| {
                let base = self.baseline.get(&episode.state);
                let baseline_value = match base {
                    Some(b) if b.action == episode.action => episode.reward,
                    _ => 0.0,
                };

                let candidate_value = match candidate.get(&episode.state) {
                    Some(c) if c.action == episode.action => {
                        // Propensity the baseline gave the recorded action
                        let behaviour = match base {
                            Some(b) if b.action == episode.action => b.probability,
                            Some(b) => 1.0 - b.probability,
                            None => 1.0,
                        };
                        let weight = if behaviour > f64::EPSILON {
                            (c.probability / behaviour).min(cap)
                        } else {
                            cap
                        };
                        episode.reward * weight
                    }
                    _ => 0.0,
                };

                (baseline_value, candidate_value)
            })
            .unzip()
    }

    fn bootstrap(
        &mut self,
        baseline_values: &[f64],
        candidate_values: &[f64],
        sample_size: usize,
        budget: BootstrapBudget,
    ) -> BootstrapSummary {
        let started = Instant::now();
        let target = budget.max_resamples.max(1);
        let n = baseline_values.len();

        let mut baseline_means = Vec::with_capacity(target);
        let mut candidate_means = Vec::with_capacity(target);
        let mut wins = 0usize;

        for _ in 0..target {
            let mut base_sum = 0.0;
            let mut cand_sum = 0.0;
            for _ in 0..sample_size {
                let i = self.rng.gen_range(0..n);
                base_sum += baseline_values[i];
                cand_sum += candidate_values[i];
            }
            let base_mean = base_sum / sample_size as f64;
            let cand_mean = cand_sum / sample_size as f64;
            if cand_mean > base_mean {
                wins += 1;
            }
            baseline_means.push(base_mean);
            candidate_means.push(cand_mean);

            if let Some(limit) = budget.max_duration {
                if started.elapsed() >= limit {
                    debug!(
                        "SafetyGate: bootstrap budget of {:?} exhausted after {} resamples",
                        limit,
                        baseline_means.len()
                    );
                    break;
                }
            }
        }

        let resamples = baseline_means.len();
        let alpha = 1.0 - self.settings.confidence_level;
        BootstrapSummary {
            baseline_mean: mean(&baseline_means),
            candidate_mean: mean(&candidate_means),
            baseline_lower_bound: lower_quantile(&mut baseline_means, alpha),
            candidate_lower_bound: lower_quantile(&mut candidate_means, alpha),
            safety_margin: wins as f64 / resamples as f64,
            resamples,
        }
    }

    fn check_constraints(&self, candidate: &Policy, summary: &BootstrapSummary) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();

        if summary.candidate_mean < self.settings.min_expected_return {
            violations.push(ConstraintViolation::BelowMinimumReturn {
                expected: summary.candidate_mean,
                minimum: self.settings.min_expected_return,
            });
        }

        let floor = summary.baseline_mean * (1.0 - self.settings.risk_tolerance_ratio);
        if summary.candidate_mean < floor {
            violations.push(ConstraintViolation::ExcessiveDegradation {
                candidate: summary.candidate_mean,
                floor,
            });
        }

        let deviation = candidate.mean_deviation_from(&self.baseline);
        if deviation > self.settings.max_policy_deviation {
            violations.push(ConstraintViolation::ExcessiveDeviation {
                deviation,
                limit: self.settings.max_policy_deviation,
            });
        }

        violations
    }

    /// Clear episodes and restore the baseline the gate was built with.
    pub fn reset(&mut self) {
        self.episodes.clear();
        self.baseline = self.initial_baseline.clone();
        self.rng = StdRng::seed_from_u64(self.settings.seed);
        self.evaluations = 0;
        self.approvals = 0;
    }

    pub fn export_state(&self) -> SafetyGateState {
        SafetyGateState {
            baseline: self.baseline.clone(),
            episodes: self.episodes.to_vec(),
            evaluations: self.evaluations,
            approvals: self.approvals,
        }
    }

    pub fn import_state(&mut self, state: SafetyGateState) -> Result<()> {
        for episode in &state.episodes {
            ensure_finite("episode.reward", episode.reward)?;
        }
        self.baseline = state.baseline;
        self.episodes.replace(state.episodes);
        self.evaluations = state.evaluations;
        self.approvals = state.approvals;
        Ok(())
    }
}

/// Per-state convex blend of `baseline` toward `candidate`.
///
/// The candidate's action wins a state when it carries more probability than
/// the baseline's. States only the candidate defines are blended from zero.
pub fn blend_policies(baseline: &Policy, candidate: &Policy, ratio: f64) -> Policy {
    let ratio = ratio.clamp(0.0, MAX_BLEND_RATIO);
    let mut blended = std::collections::BTreeMap::new();

    for (state, base) in baseline.iter() {
        let action = match candidate.get(state) {
            Some(cand) => {
                let action = if cand.probability > base.probability {
                    cand.action.clone()
                } else {
                    base.action.clone()
                };
                PolicyAction {
                    action,
                    probability: lerp(base.probability, cand.probability, ratio),
                    expected_value: lerp(base.expected_value, cand.expected_value, ratio),
                    confidence: lerp(base.confidence, cand.confidence, ratio),
                }
            }
            None => base.clone(),
        };
        blended.insert(state.clone(), action);
    }

    for (state, cand) in candidate.iter() {
        if baseline.get(state).is_none() {
            blended.insert(
                state.clone(),
                PolicyAction {
                    action: cand.action.clone(),
                    probability: cand.probability * ratio,
                    expected_value: cand.expected_value * ratio,
                    confidence: cand.confidence * ratio,
                },
            );
        }
    }

    Policy::new(blended)
}

fn lerp(from: f64, to: f64, ratio: f64) -> f64 {
    from + ratio * (to - from)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Empirical `q` quantile (lower tail); 0 for an empty sample.
fn lower_quantile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let idx = ((values.len() as f64 * q.clamp(0.0, 1.0)).floor() as usize).min(values.len() - 1);
    values[idx]
}
