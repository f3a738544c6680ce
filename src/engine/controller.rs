use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::evolution::{EvolutionReport, NoopEvolver, StrategyEvolver, StrategyPerformance};
use crate::config::ControllerConfig;
use crate::error::{CoreError, Result};
use crate::ml::bandit::{BanditArm, BanditPhase, BanditState, StrategyBandit};
use crate::ml::features::{FeatureSelector, FeatureSelectorState};
use crate::ml::regime::{RegimeDetector, RegimeDetectorState, RegimeState, RegimeSummary};
use crate::ml::regression::{OnlineElasticNet, RegressionState};
use crate::ml::tracker::{PerformanceTracker, TrackerState};
use crate::risk::LimitSnapshot;
use crate::safety::{GateStatus, HistoricalEpisode, Policy, SafetyAssessment, SafetyGate, SafetyGateState};
use crate::types::{FeatureObservation, MetaDecision};

/// Every component snapshot plus the controller's own counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub sample_count: u64,
    pub generation: u64,
    pub previous_step: Option<(String, String)>,
    pub pending_candidate: Option<Policy>,
    pub features: FeatureSelectorState,
    pub regression: RegressionState,
    pub regime: RegimeDetectorState,
    pub bandit: BanditState,
    pub safety: SafetyGateState,
    pub performance: TrackerState,
}

impl ControllerSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStats {
    pub sample_count: u64,
    pub generation: u64,
    pub arms: Vec<BanditArm>,
    pub bandit_phase: BanditPhase,
    pub exploration_constant: f64,
    pub regime: RegimeSummary,
    pub tracked_features: usize,
    pub active_weights: usize,
    pub episodes: usize,
    pub gate_evaluations: u64,
    pub gate_approvals: u64,
    pub candidate_pending: bool,
}

/// One decision per tick, for a single symbol.
///
/// Owns every learning component exclusively. Entry points take `&mut self`;
/// callers serialize access.
pub struct MetaController {
    config: ControllerConfig,
    selector: FeatureSelector,
    regression: OnlineElasticNet,
    regime: RegimeDetector,
    bandit: StrategyBandit,
    gate: SafetyGate,
    tracker: PerformanceTracker,
    evolver: Box<dyn StrategyEvolver>,
    sample_count: u64,
    generation: u64,
    /// (state, action) of the previous tick, awaiting its reward
    previous_step: Option<(String, String)>,
    pending_candidate: Option<Policy>,
    last_assessment: Option<SafetyAssessment>,
}

impl MetaController {
    pub fn new(config: ControllerConfig) -> Result<Self> {
        let baseline = default_baseline(&config);
        Self::with_parts(config, baseline, Box::new(NoopEvolver))
    }

    pub fn with_parts(config: ControllerConfig, baseline: Policy, evolver: Box<dyn StrategyEvolver>) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| CoreError::InvalidConfig(errors.join("; ")))?;

        let bandit = StrategyBandit::with_arms(config.bandit.clone(), &config.strategies);
        info!(
            "Meta controller initialized: {} strategies, profile {}",
            config.strategies.len(),
            config.profile.name()
        );

        Ok(Self {
            selector: FeatureSelector::new(config.features.clone()),
            regression: OnlineElasticNet::new(config.regression.clone()),
            regime: RegimeDetector::new(config.regime.clone()),
            gate: SafetyGate::new(config.safety.clone(), baseline),
            tracker: PerformanceTracker::new(config.meta.performance_history_len),
            bandit,
            evolver,
            config,
            sample_count: 0,
            generation: 0,
            previous_step: None,
            pending_candidate: None,
            last_assessment: None,
        })
    }

    pub fn make_decision(
        &mut self,
        observation: &FeatureObservation,
        performances: Option<&BTreeMap<String, StrategyPerformance>>,
    ) -> Result<MetaDecision> {
        observation.validate()?;
        let timestamp = observation.timestamp;

        // Feature selection
        let selected = self.selector.update(observation);
        let importances = self.selector.top_importances(self.config.features.top_k);

        // Regression on the selected subset
        let inputs = observation.restricted_to(&selected);
        self.regression.partial_fit(&inputs, observation.target, 1.0);
        let prediction = self.regression.predict(&inputs);

        // Regime
        let run_length = self.regime.update_observation_at(observation.target, timestamp)?;
        let change_probability = run_length.change_probability;
        if change_probability > self.config.meta.regime_reset_threshold {
            info!(
                "Regime change detected (p={:.3}), resetting feature selector",
                change_probability
            );
            self.selector.reset();
        }
        let regime = self.regime.current_regime();

        // Strategy
        let selection = self.bandit.select_arm_at(timestamp)?;
        self.sample_count += 1;

        if self.sample_count % self.config.meta.evolution_interval == 0 {
            self.run_evolution(performances);
        }

        let confidence = prediction.confidence * (1.0 - change_probability);
        let uncertainty = 1.0 - confidence;

        // Diagnostics only; the selection above stands either way
        let drawdown = self
            .tracker
            .summary(&selection.arm_id)
            .map(|s| s.current_drawdown)
            .unwrap_or(0.0);
        let mut safety_flags = self.config.limits.evaluate(&LimitSnapshot {
            confidence,
            uncertainty,
            change_probability,
            reward_drawdown: drawdown,
            sample_count: self.sample_count,
        });
        if self.sample_count % self.config.meta.safety_check_interval == 0 {
            if let Some(assessment) = self.evaluate_pending_candidate() {
                safety_flags.gate_status = Some(assessment.status);
                safety_flags.policy_updated = assessment.is_update_safe;
            }
        }

        if self.sample_count >= self.config.meta.min_samples_for_adaptation
            && self.sample_count % self.config.meta.adaptation_interval == 0
        {
            self.adapt_exploration();
        }

        self.record_transition(regime.state, confidence, &selection.arm_id, observation.target, timestamp)?;

        let rationale = build_rationale(
            &selection.arm_id,
            selection.phase,
            selection.score,
            &regime,
            change_probability,
            &selected,
            prediction.prediction,
            confidence,
        );
        debug!("Decision #{}: {}", self.sample_count, rationale);

        Ok(MetaDecision {
            id: MetaDecision::new_id(),
            timestamp,
            selected_strategy: selection.arm_id,
            confidence,
            uncertainty,
            prediction: prediction.prediction,
            regime: regime.state,
            change_probability,
            bandit_score: selection.score,
            safety_flags,
            selected_features: selected,
            feature_importance: importances,
            rationale,
        })
    }

    /// Settlement feedback for one resolved trade
    pub fn update_strategy_performance(&mut self, strategy_id: &str, reward: f64) -> Result<()> {
        self.bandit.update_reward(strategy_id, reward)?;
        self.tracker.record(strategy_id, reward);
        Ok(())
    }

    /// Queue a policy for the next safety-gate evaluation, replacing any
    /// candidate still waiting.
    pub fn submit_policy_candidate(&mut self, candidate: Policy) {
        if self.pending_candidate.replace(candidate).is_some() {
            debug!("Replaced pending policy candidate");
        }
    }

    pub fn last_safety_assessment(&self) -> Option<&SafetyAssessment> {
        self.last_assessment.as_ref()
    }

    pub fn baseline_policy(&self) -> &Policy {
        self.gate.baseline()
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            sample_count: self.sample_count,
            generation: self.generation,
            arms: self.bandit.arms().to_vec(),
            bandit_phase: self.bandit.phase(),
            exploration_constant: self.bandit.exploration_constant(),
            regime: self.regime.current_regime(),
            tracked_features: self.selector.feature_count(),
            active_weights: self.regression.active_features(),
            episodes: self.gate.episode_count(),
            gate_evaluations: self.gate.evaluations(),
            gate_approvals: self.gate.approvals(),
            candidate_pending: self.pending_candidate.is_some(),
        }
    }

    pub fn reset(&mut self) {
        self.selector.reset();
        self.regression.reset();
        self.regime.reset();
        self.bandit.reset();
        self.gate.reset();
        self.tracker.reset();
        self.sample_count = 0;
        self.generation = 0;
        self.previous_step = None;
        self.pending_candidate = None;
        self.last_assessment = None;
        info!("Meta controller reset");
    }

    pub fn export_state(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            sample_count: self.sample_count,
            generation: self.generation,
            previous_step: self.previous_step.clone(),
            pending_candidate: self.pending_candidate.clone(),
            features: self.selector.export_state(),
            regression: self.regression.export_state(),
            regime: self.regime.export_state(),
            bandit: self.bandit.export_state(),
            safety: self.gate.export_state(),
            performance: self.tracker.export_state(),
        }
    }

    /// Restore every component. Each snapshot is imported into a fresh
    /// component first; the controller is only modified once all imports
    /// succeed.
    pub fn import_state(&mut self, snapshot: ControllerSnapshot) -> Result<()> {
        let mut selector = FeatureSelector::new(self.config.features.clone());
        selector.import_state(snapshot.features)?;
        let mut regression = OnlineElasticNet::new(self.config.regression.clone());
        regression.import_state(snapshot.regression)?;
        let mut regime = RegimeDetector::new(self.config.regime.clone());
        regime.import_state(snapshot.regime)?;
        let mut bandit = StrategyBandit::new(self.config.bandit.clone());
        bandit.import_state(snapshot.bandit)?;
        let mut gate = SafetyGate::new(self.config.safety.clone(), self.gate.initial_baseline().clone());
        gate.import_state(snapshot.safety)?;
        let mut tracker = PerformanceTracker::new(self.config.meta.performance_history_len);
        tracker.import_state(snapshot.performance);

        self.selector = selector;
        self.regression = regression;
        self.regime = regime;
        self.bandit = bandit;
        self.gate = gate;
        self.tracker = tracker;
        self.sample_count = snapshot.sample_count;
        self.generation = snapshot.generation;
        self.previous_step = snapshot.previous_step;
        self.pending_candidate = snapshot.pending_candidate;
        self.last_assessment = None;
        info!("Meta controller restored at sample {}", self.sample_count);
        Ok(())
    }

    fn run_evolution(&mut self, performances: Option<&BTreeMap<String, StrategyPerformance>>) {
        self.generation += 1;
        let derived;
        let performances = match performances {
            Some(p) => p,
            None => {
                derived = self
                    .tracker
                    .summaries()
                    .into_iter()
                    .map(|(id, summary)| (id, StrategyPerformance::from(summary)))
                    .collect::<BTreeMap<_, _>>();
                &derived
            }
        };

        let report = self.evolver.evolve(self.generation, performances);
        self.apply_evolution(&report);
    }

    fn apply_evolution(&mut self, report: &EvolutionReport) {
        for id in &report.promoted {
            if self.bandit.add_arm(id) {
                info!("Evolution generation {}: promoted strategy '{}'", self.generation, id);
            }
        }
        for id in &report.retired {
            if self.bandit.arm_count() <= 1 {
                warn!("Evolution asked to retire '{}' but it is the last strategy", id);
                break;
            }
            match self.bandit.remove_arm(id) {
                Ok(_) => {
                    self.tracker.remove_strategy(id);
                    info!("Evolution generation {}: retired strategy '{}'", self.generation, id);
                }
                Err(e) => debug!("Evolution retire skipped: {}", e),
            }
        }
    }

    fn evaluate_pending_candidate(&mut self) -> Option<SafetyAssessment> {
        let candidate = self.pending_candidate.take()?;
        let assessment = self.gate.propose_update(&candidate);
        if assessment.status == GateStatus::InsufficientData {
            // Retry at the next interval
            self.pending_candidate = Some(candidate);
        }
        self.last_assessment = Some(assessment.clone());
        Some(assessment)
    }

    /// Nudge exploration against the recent reward trend: improving rewards
    /// exploit more, deteriorating rewards explore more.
    fn adapt_exploration(&mut self) {
        let Some(trend) = self.tracker.reward_trend(self.config.meta.trend_window) else {
            return;
        };
        let step = self.config.meta.exploration_step;
        let factor = if trend > 0.0 {
            1.0 - step
        } else if trend < 0.0 {
            1.0 + step
        } else {
            return;
        };
        let before = self.bandit.exploration_constant();
        let after = self.bandit.adjust_exploration(factor);
        debug!(
            "Meta adaptation: reward trend {:+.4}, exploration {:.3} -> {:.3}",
            trend, before, after
        );
    }

    fn record_transition(
        &mut self,
        regime: RegimeState,
        confidence: f64,
        action: &str,
        reward: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let state = encode_state(regime, confidence, self.config.meta.confidence_buckets);
        if let Some((previous_state, previous_action)) = self.previous_step.take() {
            self.gate.record_episode(HistoricalEpisode {
                state: previous_state,
                action: previous_action,
                reward,
                next_state: state.clone(),
                timestamp,
            })?;
        }
        self.previous_step = Some((state, action.to_string()));
        Ok(())
    }
}

/// Policy state key: regime label plus a confidence bucket, e.g. `Bull:2`.
pub fn encode_state(regime: RegimeState, confidence: f64, buckets: usize) -> String {
    let buckets = buckets.max(1);
    let bucket = ((confidence.clamp(0.0, 1.0) * buckets as f64) as usize).min(buckets - 1);
    format!("{}:{}", regime.as_str(), bucket)
}

/// All encoded states, in regime then bucket order
pub fn all_states(buckets: usize) -> Vec<String> {
    let mut states = Vec::new();
    for index in 0..4 {
        if let Some(regime) = RegimeState::from_index(index) {
            for bucket in 0..buckets.max(1) {
                states.push(format!("{}:{}", regime.as_str(), bucket));
            }
        }
    }
    states
}

/// First configured strategy everywhere, at the probability a uniform choice
/// over all strategies would give it.
fn default_baseline(config: &ControllerConfig) -> Policy {
    let action = config.strategies.first().map(String::as_str).unwrap_or_default();
    let probability = 1.0 / config.strategies.len().max(1) as f64;
    Policy::uniform(&all_states(config.meta.confidence_buckets), action, probability)
}

#[allow(clippy::too_many_arguments)]
fn build_rationale(
    strategy: &str,
    phase: BanditPhase,
    score: f64,
    regime: &RegimeSummary,
    change_probability: f64,
    features: &[String],
    prediction: f64,
    confidence: f64,
) -> String {
    let top_features = if features.is_empty() {
        "none".to_string()
    } else {
        features.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
    };
    format!(
        "Selected '{}' by {} (score {:.3}); regime {} (run length {}, change p={:.2}); \
         top features: {}; prediction {:+.4} at confidence {:.2}",
        strategy,
        phase,
        score,
        regime.state,
        regime.run_length,
        change_probability,
        top_features,
        prediction,
        confidence
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BanditSettings, MetaSettings, SafetyGateSettings};
    use crate::engine::evolution::MockStrategyEvolver;
    use crate::safety::PolicyAction;
    use chrono::{Duration, TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config() -> ControllerConfig {
        ControllerConfig {
            strategies: vec!["trend".into(), "momentum".into(), "mean_reversion".into()],
            bandit: BanditSettings {
                min_exploration_period: 2,
                ..BanditSettings::default()
            },
            ..ControllerConfig::default()
        }
    }

    fn observation(rng: &mut StdRng, step: i64, level: f64) -> FeatureObservation {
        let x1: f64 = rng.gen_range(-1.0..1.0);
        let x2: f64 = rng.gen_range(-1.0..1.0);
        let noise: f64 = rng.gen_range(-0.05..0.05);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        FeatureObservation::from_pairs([("x1", x1), ("x2", x2)], level + 0.5 * x1 + noise)
            .with_timestamp(start + Duration::minutes(step))
    }

    #[test]
    fn test_decision_pipeline() {
        let mut controller = MetaController::new(config()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        let mut last = None;
        for step in 0..60 {
            let decision = controller.make_decision(&observation(&mut rng, step, 0.0), None).unwrap();
            controller
                .update_strategy_performance(&decision.selected_strategy, 0.1)
                .unwrap();
            last = Some(decision);
        }

        let decision = last.unwrap();
        assert!(controller.config().strategies.contains(&decision.selected_strategy));
        assert!((0.0..=1.0).contains(&decision.confidence));
        assert!((decision.confidence + decision.uncertainty - 1.0).abs() < 1e-12);
        assert!(decision.rationale.contains(&decision.selected_strategy));
        assert!(decision.rationale.contains("regime"));
        assert!(!decision.feature_importance.is_empty());
        assert_eq!(controller.sample_count(), 60);
        // One episode per transition
        assert_eq!(controller.stats().episodes, 59);
    }

    #[test]
    fn test_non_finite_input_rejects_tick() {
        let mut controller = MetaController::new(config()).unwrap();
        let bad = FeatureObservation::from_pairs([("x1", f64::NAN)], 0.0);
        assert!(matches!(
            controller.make_decision(&bad, None),
            Err(CoreError::InvalidInput { .. })
        ));
        assert_eq!(controller.sample_count(), 0);
    }

    #[test]
    fn test_unknown_strategy_feedback() {
        let mut controller = MetaController::new(config()).unwrap();
        assert!(matches!(
            controller.update_strategy_performance("scalp", 1.0),
            Err(CoreError::UnknownArm(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.strategies.clear();
        assert!(matches!(MetaController::new(bad), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_regime_shift_lowers_confidence() {
        let mut controller = MetaController::new(config()).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for step in 0..100 {
            controller.make_decision(&observation(&mut rng, step, 0.0), None).unwrap();
        }
        assert_eq!(controller.stats().tracked_features, 2);

        let reset_threshold = controller.config().meta.regime_reset_threshold;
        let mut flagged = false;
        for step in 100..106 {
            let decision = controller.make_decision(&observation(&mut rng, step, 5.0), None).unwrap();
            if decision.change_probability > reset_threshold {
                flagged = true;
                assert!(decision.safety_flags.regime_unstable);
                assert!(decision.confidence <= 0.5);
                // Selector wiped, but the decision keeps the importances seen before the wipe
                assert_eq!(controller.stats().tracked_features, 0);
                assert!(!decision.feature_importance.is_empty());
            }
        }
        assert!(flagged);

        // The selector rebuilds once the new regime settles
        let mut last = None;
        for step in 106..140 {
            last = Some(controller.make_decision(&observation(&mut rng, step, 5.0), None).unwrap());
        }
        let decision = last.unwrap();
        assert!(decision.change_probability <= reset_threshold);
        assert_eq!(controller.stats().tracked_features, 2);
        assert!(!decision.selected_features.is_empty());
    }

    #[test]
    fn test_stationary_stream_keeps_selector_past_run_length_cap() {
        let mut controller = MetaController::new(config()).unwrap();
        let reset_threshold = controller.config().meta.regime_reset_threshold;
        let horizon = 3 * controller.config().regime.max_run_length as i64 + 50;
        let mut rng = StdRng::seed_from_u64(13);

        for step in 0..horizon {
            let decision = controller.make_decision(&observation(&mut rng, step, 0.0), None).unwrap();
            if step >= 50 {
                assert!(
                    decision.change_probability <= reset_threshold,
                    "false regime change at step {} (p={})",
                    step,
                    decision.change_probability
                );
                assert_ne!(decision.regime, RegimeState::Transition);
                assert_eq!(controller.stats().tracked_features, 2);
            }
        }
    }

    #[test]
    fn test_failed_import_leaves_controller_untouched() {
        let mut donor = MetaController::new(config()).unwrap();
        let mut rng = StdRng::seed_from_u64(31);
        for step in 0..30 {
            donor.make_decision(&observation(&mut rng, step, 0.0), None).unwrap();
        }
        let mut snapshot = donor.export_state();
        snapshot.regime.beliefs = vec![0.2, 0.2];
        snapshot.regime.regimes.truncate(2);

        let mut controller = MetaController::new(config()).unwrap();
        for step in 0..10 {
            controller.make_decision(&observation(&mut rng, step, 1.0), None).unwrap();
        }
        let before = controller.export_state();

        assert!(matches!(
            controller.import_state(snapshot),
            Err(CoreError::InvalidSnapshot(_))
        ));
        assert_eq!(controller.export_state(), before);
        assert_eq!(controller.sample_count(), 10);
    }

    #[test]
    fn test_evolver_called_on_interval() {
        let mut evolver = MockStrategyEvolver::new();
        evolver
            .expect_evolve()
            .withf(|generation, performances| *generation == 1 && performances.contains_key("trend"))
            .times(1)
            .returning(|_, _| EvolutionReport {
                promoted: vec!["breakout".into()],
                retired: vec!["mean_reversion".into()],
            });

        let cfg = ControllerConfig {
            meta: MetaSettings {
                evolution_interval: 10,
                ..MetaSettings::default()
            },
            ..config()
        };
        let baseline = default_baseline(&cfg);
        let mut controller = MetaController::with_parts(cfg, baseline, Box::new(evolver)).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let mut performances = BTreeMap::new();
        performances.insert("trend".to_string(), StrategyPerformance::default());
        for step in 0..10 {
            controller
                .make_decision(&observation(&mut rng, step, 0.0), Some(&performances))
                .unwrap();
        }

        let ids: Vec<String> = controller.stats().arms.into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["trend", "momentum", "breakout"]);
    }

    #[test]
    fn test_candidate_policy_goes_through_gate() {
        let cfg = ControllerConfig {
            strategies: vec!["trend".into()],
            safety: SafetyGateSettings {
                min_dataset_size: 50,
                bootstrap_samples: 200,
                ..SafetyGateSettings::default()
            },
            meta: MetaSettings {
                safety_check_interval: 20,
                ..MetaSettings::default()
            },
            ..config()
        };
        let mut controller = MetaController::new(cfg).unwrap();
        let baseline = controller.baseline_policy().clone();
        assert_eq!(baseline.get("Neutral:0").unwrap().probability, 1.0);

        // Same action everywhere at lower probability: a pure degradation
        let candidate = Policy::uniform(&all_states(3), "trend", 0.8);
        controller.submit_policy_candidate(candidate);

        let mut rng = StdRng::seed_from_u64(5);
        for step in 0..20 {
            let decision = controller.make_decision(&observation(&mut rng, step, 1.0), None).unwrap();
            if step == 19 {
                assert_eq!(decision.safety_flags.gate_status, Some(GateStatus::InsufficientData));
            }
        }
        assert!(controller.stats().candidate_pending);

        for step in 20..60 {
            controller.make_decision(&observation(&mut rng, step, 1.0), None).unwrap();
        }
        let assessment = controller.last_safety_assessment().unwrap();
        assert_eq!(assessment.status, GateStatus::Rejected);
        assert!(!assessment.is_update_safe);
        assert_eq!(controller.baseline_policy(), &baseline);
        assert!(!controller.stats().candidate_pending);
    }

    #[test]
    fn test_meta_adaptation_reacts_to_trend() {
        let cfg = ControllerConfig {
            meta: MetaSettings {
                min_samples_for_adaptation: 10,
                adaptation_interval: 10,
                ..MetaSettings::default()
            },
            ..config()
        };
        let mut controller = MetaController::new(cfg).unwrap();
        let start = controller.stats().exploration_constant;
        let mut rng = StdRng::seed_from_u64(11);
        for step in 0..10 {
            let decision = controller.make_decision(&observation(&mut rng, step, 0.0), None).unwrap();
            // Rewards keep falling
            controller
                .update_strategy_performance(&decision.selected_strategy, -(step as f64))
                .unwrap();
        }
        // Adaptation ran at sample 10, before the tenth reward arrived
        assert!(controller.stats().exploration_constant > start);
    }

    #[test]
    fn test_reset_and_snapshot_roundtrip() {
        let mut controller = MetaController::new(config()).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        for step in 0..40 {
            let decision = controller.make_decision(&observation(&mut rng, step, 0.0), None).unwrap();
            controller
                .update_strategy_performance(&decision.selected_strategy, 0.2)
                .unwrap();
        }
        controller.submit_policy_candidate(Policy::default().with_action("Bull:0", PolicyAction::new("trend", 0.4)));

        let snapshot = controller.export_state();
        let json = snapshot.to_json().unwrap();
        let decoded = ControllerSnapshot::from_json(&json).unwrap();
        assert_eq!(decoded, snapshot);

        let mut restored = MetaController::new(config()).unwrap();
        restored.import_state(decoded).unwrap();
        assert_eq!(restored.export_state(), snapshot);
        assert_eq!(restored.stats().sample_count, 40);

        controller.reset();
        let stats = controller.stats();
        assert_eq!(stats.sample_count, 0);
        assert_eq!(stats.episodes, 0);
        assert_eq!(stats.tracked_features, 0);
        assert!(stats.arms.iter().all(|a| a.pull_count == 0));
        assert!(!stats.candidate_pending);
    }

    #[test]
    fn test_encode_state_buckets() {
        assert_eq!(encode_state(RegimeState::Bull, 0.0, 3), "Bull:0");
        assert_eq!(encode_state(RegimeState::Bull, 0.5, 3), "Bull:1");
        assert_eq!(encode_state(RegimeState::Bear, 1.0, 3), "Bear:2");
        assert_eq!(all_states(3).len(), 12);
    }
}
