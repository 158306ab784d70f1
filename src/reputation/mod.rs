//! Reputation Engine: scores each neighbor every round
//! from four signals, smooths the result across rounds, and converts
//! the final score into an aggregation weight or a rejection. Owned
//! one per node as an explicit `HashMap<NodeId, ReputationRecord>`
//! rather than shared process-global state.

pub mod signals;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::debug;

use crate::node_id::NodeId;
use crate::parameter_store::ParameterStore;

/// Score below which a neighbor's update is rejected outright rather
/// than merely down-weighted.
pub const REJECTION_THRESHOLD: f64 = 0.6;

/// History length kept per neighbor for the dynamic-weighting signal
/// deviation calculation.
const HISTORY_CAPACITY: usize = 16;

/// Smoothing applied when folding this round's raw score into the
/// neighbor's running score.
const SCORE_SMOOTHING: f64 = 0.9;

/// Smoothing applied when folding peer-reported feedback about this
/// node into its own locally observed reputation of that peer.
const FEEDBACK_SMOOTHING: f64 = 0.9;

/// The four signal values computed for a neighbor in one round,
/// before being combined into a single score.
#[derive(Debug, Clone, Copy)]
pub struct SignalSet {
    pub message_count: f64,
    pub latency: f64,
    pub parameter_change: f64,
    pub similarity: f64,
}

impl SignalSet {
    fn as_array(&self) -> [f64; 4] {
        [self.message_count, self.latency, self.parameter_change, self.similarity]
    }
}

/// Whether signals are combined with a configured static weighting, or
/// a per-round weighting that favors whichever signal has deviated
/// least from its own historical mean (the signal that's currently
/// most informative).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightingMode {
    Static,
    Dynamic,
}

/// Which of the four signals actually feed into a neighbor's score.
/// A metric left out is zeroed before weighting rather than removed
/// from the weighted mean outright, so `weight_*` values configured
/// for an excluded metric don't have to be redistributed by hand.
#[derive(Debug, Clone, Copy)]
pub struct ActiveMetrics {
    pub message_count: bool,
    pub latency: bool,
    pub parameter_change: bool,
    pub similarity: bool,
}

impl Default for ActiveMetrics {
    fn default() -> Self {
        Self {
            message_count: true,
            latency: true,
            parameter_change: true,
            similarity: true,
        }
    }
}

impl ActiveMetrics {
    fn as_array(&self) -> [bool; 4] {
        [self.message_count, self.latency, self.parameter_change, self.similarity]
    }
}

/// Static per-signal weights, in the same `[message_count, latency,
/// parameter_change, similarity]` order as `SignalSet::as_array`.
#[derive(Debug, Clone, Copy)]
pub struct StaticWeights {
    pub message_count: f64,
    pub latency: f64,
    pub parameter_change: f64,
    pub similarity: f64,
}

impl Default for StaticWeights {
    fn default() -> Self {
        Self {
            message_count: 0.25,
            latency: 0.25,
            parameter_change: 0.25,
            similarity: 0.25,
        }
    }
}

impl StaticWeights {
    fn as_array(&self) -> [f64; 4] {
        [self.message_count, self.latency, self.parameter_change, self.similarity]
    }
}

struct ReputationRecord {
    score: f64,
    last_update_round: i32,
    last_feedback_round: Option<i32>,
    signal_history: [VecDeque<f64>; 4],
}

impl ReputationRecord {
    fn new(initial_reputation: f64) -> Self {
        Self {
            score: initial_reputation,
            last_update_round: -1,
            last_feedback_round: None,
            signal_history: Default::default(),
        }
    }

    fn push_signals(&mut self, signals: &SignalSet) {
        for (history, value) in self.signal_history.iter_mut().zip(signals.as_array()) {
            if history.len() >= HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(value);
        }
    }

    fn historical_mean(&self, index: usize) -> f64 {
        let history = &self.signal_history[index];
        if history.is_empty() {
            return 0.5;
        }
        history.iter().sum::<f64>() / history.len() as f64
    }
}

pub struct ReputationEngine {
    local: NodeId,
    weighting: WeightingMode,
    initial_reputation: f64,
    active_metrics: ActiveMetrics,
    static_weights: StaticWeights,
    records: Mutex<HashMap<NodeId, ReputationRecord>>,
}

impl ReputationEngine {
    pub fn new(local: NodeId, weighting: WeightingMode) -> Self {
        Self::with_config(local, weighting, 1.0, ActiveMetrics::default(), StaticWeights::default())
    }

    /// Builds an engine honoring the defense section's configured
    /// starting score, active-metric selection, and static weighting —
    /// the knobs a scenario's `[defense]` table exposes.
    pub fn with_config(
        local: NodeId,
        weighting: WeightingMode,
        initial_reputation: f64,
        active_metrics: ActiveMetrics,
        static_weights: StaticWeights,
    ) -> Self {
        Self {
            local,
            weighting,
            initial_reputation,
            active_metrics,
            static_weights,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Folds this round's signal set for `neighbor` into its running
    /// score and returns the neighbor's updated score.
    pub fn record_round(&self, neighbor: NodeId, round: i32, signals: SignalSet) -> f64 {
        let mut records = self.records.lock().expect("reputation lock poisoned");
        let record = records
            .entry(neighbor)
            .or_insert_with(|| ReputationRecord::new(self.initial_reputation));

        let mut weights = match self.weighting {
            WeightingMode::Static => self.static_weights.as_array(),
            WeightingMode::Dynamic => dynamic_weights(record, &signals),
        };
        for (weight, active) in weights.iter_mut().zip(self.active_metrics.as_array()) {
            if !active {
                *weight = 0.0;
            }
        }

        let raw: f64 = signals
            .as_array()
            .iter()
            .zip(weights.iter())
            .map(|(value, weight)| value * weight)
            .sum();

        record.push_signals(&signals);
        record.score = SCORE_SMOOTHING * raw + (1.0 - SCORE_SMOOTHING) * record.score;
        record.last_update_round = round;

        debug!(%neighbor, round, score = record.score, "reputation updated");
        record.score
    }

    pub fn score_of(&self, neighbor: &NodeId) -> f64 {
        self.records
            .lock()
            .expect("reputation lock poisoned")
            .get(neighbor)
            .map(|r| r.score)
            .unwrap_or(self.initial_reputation)
    }

    /// Whether a neighbor's update should be accepted into the
    /// aggregation buffer at all.
    pub fn accepts(&self, neighbor: &NodeId) -> bool {
        self.score_of(neighbor) >= REJECTION_THRESHOLD
    }

    /// The aggregation weight a neighbor's update should carry, scaled
    /// so the rejection threshold maps to zero weight and a perfect
    /// score maps to full weight.
    pub fn weight_of(&self, neighbor: &NodeId) -> f64 {
        let score = self.score_of(neighbor);
        if score < REJECTION_THRESHOLD {
            0.0
        } else {
            ((score - REJECTION_THRESHOLD) / (1.0 - REJECTION_THRESHOLD)).clamp(0.0, 1.0)
        }
    }

    /// Absorbs feedback other peers reported about this node's own
    /// trustworthiness, folding the mean of their reports into the
    /// node's locally observed reputation of itself. Idempotent per
    /// round: a second call for the same round is a no-op, since the
    /// original feedback channel can redeliver within a round.
    pub fn absorb_feedback(&self, round: i32, peer_feedback: &[f64]) {
        if peer_feedback.is_empty() {
            return;
        }
        let mut records = self.records.lock().expect("reputation lock poisoned");
        let record = records
            .entry(self.local)
            .or_insert_with(|| ReputationRecord::new(self.initial_reputation));

        if record.last_feedback_round == Some(round) {
            return;
        }

        let mean_feedback = peer_feedback.iter().sum::<f64>() / peer_feedback.len() as f64;
        record.score = FEEDBACK_SMOOTHING * record.score + (1.0 - FEEDBACK_SMOOTHING) * mean_feedback;
        record.last_feedback_round = Some(round);
    }

    pub fn similarity_to_local(
        &self,
        neighbor_update: &dyn ParameterStore,
        local_update: &dyn ParameterStore,
    ) -> Option<f64> {
        signals::similarity_signal(neighbor_update, local_update)
    }
}

fn dynamic_weights(record: &ReputationRecord, signals: &SignalSet) -> [f64; 4] {
    let deviations: Vec<f64> = signals
        .as_array()
        .iter()
        .enumerate()
        .map(|(i, value)| (value - record.historical_mean(i)).abs())
        .collect();

    let mean_deviation = deviations.iter().sum::<f64>() / deviations.len() as f64;
    let floor = (mean_deviation / (mean_deviation + 1.0)).max(0.1);

    let raw_weights: Vec<f64> = deviations
        .iter()
        .map(|deviation| (1.0 - deviation).max(floor))
        .collect();
    let total: f64 = raw_weights.iter().sum();

    let mut weights = [0.0; 4];
    for (w, raw) in weights.iter_mut().zip(raw_weights) {
        *w = raw / total;
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str) -> NodeId {
        addr.parse().unwrap()
    }

    fn perfect_signals() -> SignalSet {
        SignalSet {
            message_count: 1.0,
            latency: 1.0,
            parameter_change: 1.0,
            similarity: 1.0,
        }
    }

    #[test]
    fn perfect_signals_keep_score_at_ceiling() {
        let engine = ReputationEngine::new(node("10.0.0.1:5000"), WeightingMode::Static);
        let peer = node("10.0.0.2:5000");
        let score = engine.record_round(peer, 0, perfect_signals());
        assert!((score - 1.0).abs() < 1e-9);
        assert!(engine.accepts(&peer));
        assert!((engine.weight_of(&peer) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn poor_signals_drop_below_rejection_threshold() {
        let engine = ReputationEngine::new(node("10.0.0.1:5000"), WeightingMode::Static);
        let peer = node("10.0.0.2:5000");
        let poor = SignalSet {
            message_count: 0.0,
            latency: 0.0,
            parameter_change: 0.0,
            similarity: 0.0,
        };
        let score = engine.record_round(peer, 0, poor);
        assert!(score < REJECTION_THRESHOLD);
        assert!(!engine.accepts(&peer));
        assert_eq!(engine.weight_of(&peer), 0.0);
    }

    #[test]
    fn feedback_only_absorbed_once_per_round() {
        let engine = ReputationEngine::new(node("10.0.0.1:5000"), WeightingMode::Static);
        let local = node("10.0.0.1:5000");
        engine.record_round(local, 0, perfect_signals());
        let before = engine.score_of(&local);
        engine.absorb_feedback(1, &[0.0, 0.0]);
        let after_first = engine.score_of(&local);
        assert!(after_first < before);
        engine.absorb_feedback(1, &[1.0, 1.0]);
        let after_second = engine.score_of(&local);
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn with_config_honors_the_configured_starting_score() {
        let engine = ReputationEngine::with_config(
            node("10.0.0.1:5000"),
            WeightingMode::Static,
            0.8,
            ActiveMetrics::default(),
            StaticWeights::default(),
        );
        let peer = node("10.0.0.2:5000");
        assert_eq!(engine.score_of(&peer), 0.8);
    }

    #[test]
    fn similarity_only_metric_selection_ignores_the_other_three_signals() {
        let active_metrics = ActiveMetrics {
            message_count: false,
            latency: false,
            parameter_change: false,
            similarity: true,
        };
        let engine = ReputationEngine::with_config(
            node("10.0.0.1:5000"),
            WeightingMode::Static,
            1.0,
            active_metrics,
            StaticWeights::default(),
        );
        let peer = node("10.0.0.2:5000");
        let signals = SignalSet {
            message_count: 0.0,
            latency: 0.0,
            parameter_change: 0.0,
            similarity: 1.0,
        };
        let score = engine.record_round(peer, 0, signals);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn static_weights_scale_each_signal_independently() {
        let static_weights = StaticWeights {
            message_count: 1.0,
            latency: 0.0,
            parameter_change: 0.0,
            similarity: 0.0,
        };
        let engine = ReputationEngine::with_config(
            node("10.0.0.1:5000"),
            WeightingMode::Static,
            0.0,
            ActiveMetrics::default(),
            static_weights,
        );
        let peer = node("10.0.0.2:5000");
        let signals = SignalSet {
            message_count: 1.0,
            latency: 0.0,
            parameter_change: 0.0,
            similarity: 0.0,
        };
        let score = engine.record_round(peer, 0, signals);
        assert!((score - SCORE_SMOOTHING).abs() < 1e-9);
    }
}
