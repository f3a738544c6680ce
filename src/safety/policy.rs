use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// What a policy prescribes in one encoded state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAction {
    pub action: String,
    pub probability: f64,
    pub expected_value: f64,
    pub confidence: f64,
}

impl PolicyAction {
    pub fn new(action: &str, probability: f64) -> Self {
        Self {
            action: action.to_string(),
            probability: probability.clamp(0.0, 1.0),
            expected_value: 0.0,
            confidence: 0.0,
        }
    }

    pub fn with_expected_value(mut self, expected_value: f64) -> Self {
        self.expected_value = expected_value;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Immutable state-encoding -> action snapshot.
///
/// Clones share the underlying map; "modifying" methods return a new snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Policy {
    actions: Arc<BTreeMap<String, PolicyAction>>,
}

impl Policy {
    pub fn new(actions: BTreeMap<String, PolicyAction>) -> Self {
        Self {
            actions: Arc::new(actions),
        }
    }

    /// Every state maps to the same action with the given probability.
    pub fn uniform<S: AsRef<str>>(states: &[S], action: &str, probability: f64) -> Self {
        Self::new(
            states
                .iter()
                .map(|s| (s.as_ref().to_string(), PolicyAction::new(action, probability)))
                .collect(),
        )
    }

    pub fn with_action(&self, state: &str, action: PolicyAction) -> Self {
        let mut actions = (*self.actions).clone();
        actions.insert(state.to_string(), action);
        Self::new(actions)
    }

    pub fn get(&self, state: &str) -> Option<&PolicyAction> {
        self.actions.get(state)
    }

    pub fn states(&self) -> impl Iterator<Item = &String> {
        self.actions.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PolicyAction)> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True when both handles point at the same snapshot.
    pub fn same_snapshot(&self, other: &Policy) -> bool {
        Arc::ptr_eq(&self.actions, &other.actions)
    }

    /// Mean per-state probability deviation of `self` from `baseline`,
    /// over the states `self` defines. A state prescribing a different action
    /// than the baseline deviates by the larger of the two probabilities.
    pub fn mean_deviation_from(&self, baseline: &Policy) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .iter()
            .map(|(state, cand)| match baseline.get(state) {
                Some(base) if base.action == cand.action => (cand.probability - base.probability).abs(),
                Some(base) => cand.probability.max(base.probability),
                None => cand.probability,
            })
            .sum();
        total / self.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_action_leaves_original_untouched() {
        let base = Policy::uniform(&["s0", "s1"], "trend", 0.5);
        let next = base.with_action("s0", PolicyAction::new("momentum", 0.9));

        assert_eq!(base.get("s0").unwrap().action, "trend");
        assert_eq!(next.get("s0").unwrap().action, "momentum");
        assert!(!base.same_snapshot(&next));

        let shared = base.clone();
        assert!(base.same_snapshot(&shared));
    }

    #[test]
    fn test_probability_is_clamped() {
        assert_eq!(PolicyAction::new("a", 1.7).probability, 1.0);
        assert_eq!(PolicyAction::new("a", -0.2).probability, 0.0);
    }

    #[test]
    fn test_mean_deviation() {
        let base = Policy::uniform(&["s0", "s1"], "trend", 0.5);
        let cand = Policy::uniform(&["s0", "s1"], "trend", 0.7);
        assert!((cand.mean_deviation_from(&base) - 0.2).abs() < 1e-12);

        let switched = cand.with_action("s1", PolicyAction::new("breakout", 0.6));
        // (0.2 + 0.6) / 2
        assert!((switched.mean_deviation_from(&base) - 0.4).abs() < 1e-12);
        assert_eq!(Policy::default().mean_deviation_from(&base), 0.0);
    }

    #[test]
    fn test_serde_is_a_plain_map() {
        let policy = Policy::uniform(&["s0"], "trend", 0.5);
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.starts_with("{\"s0\":"));
        let back: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
