//! The four raw signals combined into one neighbor reputation score
//! each round.

use crate::parameter_store::{
    cosine_similarity, manhattan_distance, pearson_correlation, squared_euclidean_distance,
    ParameterStore,
};

/// Message-count signal: how a neighbor's per-round message count
/// compares to the federation's 25th percentile. A neighbor sending
/// noticeably fewer messages than its peers looks unreliable or
/// throttled; sending more is never penalized.
pub fn message_count_signal(counts: &[u32], this_count: u32) -> f64 {
    if counts.is_empty() {
        return 1.0;
    }
    let p25 = percentile_25(counts);
    if p25 <= 0.0 {
        return 1.0;
    }
    (this_count as f64 / p25).min(1.0)
}

fn percentile_25(counts: &[u32]) -> f64 {
    let mut sorted: Vec<u32> = counts.to_vec();
    sorted.sort_unstable();
    let rank = 0.25 * (sorted.len() as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower] as f64
    } else {
        let frac = rank - lower as f64;
        sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
    }
}

/// Arrival-latency signal: lower latency relative to the round's
/// slowest observed arrival scores higher, exponentially smoothed
/// across rounds (weight 0.2 on the newest sample) so one slow round
/// doesn't collapse a neighbor's score outright.
pub fn latency_signal(latency: f64, max_latency: f64, previous_smoothed: Option<f64>) -> f64 {
    let normalized = if max_latency > 0.0 {
        1.0 - (latency / max_latency).clamp(0.0, 1.0)
    } else {
        1.0
    };
    match previous_smoothed {
        Some(previous) => 0.2 * normalized + 0.8 * previous,
        None => normalized,
    }
}

/// Parameter-change-fraction signal: compares the fraction of
/// parameters that moved more than an adaptive threshold since the
/// neighbor's last update against that same threshold. A neighbor
/// whose model churns far more than the threshold allows looks
/// erratic or adversarial.
pub fn parameter_change_signal(fraction_changed: f64, adaptive_threshold: f64) -> f64 {
    if adaptive_threshold <= 0.0 {
        return 1.0;
    }
    (1.0 - (fraction_changed / adaptive_threshold).clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Similarity signal: an equally-weighted blend of cosine similarity,
/// inverse Euclidean distance, inverse Manhattan distance and Pearson
/// correlation between a neighbor's update and the current local
/// model.
pub fn similarity_signal(neighbor: &dyn ParameterStore, local: &dyn ParameterStore) -> Option<f64> {
    let cosine = cosine_similarity(neighbor, local)?;
    let euclidean = squared_euclidean_distance(neighbor, local)?.sqrt();
    let manhattan = manhattan_distance(neighbor, local)?;
    let pearson = pearson_correlation(neighbor, local)?;

    let euclidean_sim = 1.0 / (1.0 + euclidean);
    let manhattan_sim = 1.0 / (1.0 + manhattan);

    Some(0.25 * cosine + 0.25 * euclidean_sim + 0.25 * manhattan_sim + 0.25 * pearson)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter_store::DenseParameters;

    #[test]
    fn message_count_signal_caps_at_one() {
        let counts = [5, 5, 5, 5];
        assert_eq!(message_count_signal(&counts, 10), 1.0);
        assert!(message_count_signal(&counts, 1) < 1.0);
    }

    #[test]
    fn latency_signal_smooths_toward_previous() {
        let fresh = latency_signal(1.0, 10.0, None);
        let smoothed = latency_signal(1.0, 10.0, Some(0.5));
        assert!((fresh - 0.9).abs() < 1e-9);
        assert!((smoothed - (0.2 * 0.9 + 0.8 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn similarity_of_identical_models_is_one() {
        let a = DenseParameters::new(vec![1.0, 2.0, 3.0]);
        let b = DenseParameters::new(vec![1.0, 2.0, 3.0]);
        let signal = similarity_signal(&a, &b).unwrap();
        assert!((signal - 1.0).abs() < 1e-9);
    }
}
