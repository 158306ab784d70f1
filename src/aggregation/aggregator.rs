//! Pluggable aggregation algorithm: a small trait object chosen once
//! at startup from the scenario configuration and invoked every
//! round. A malicious node doesn't get its own aggregator variant —
//! it wraps an ordinary one behind `AttackStrategy` instead (see
//! `role::malicious`).

use thiserror::Error;

use crate::node_id::NodeId;
use crate::parameter_store::{DenseParameters, ParameterStore};

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("no updates to aggregate")]
    Empty,

    #[error("incompatible parameter vector lengths: {0} vs {1}")]
    Incompatible(usize, usize),

    #[error("aggregation timed out waiting for round {0}")]
    Timeout(i32),

    #[error("{0} is not a member of the current federation")]
    NotInFederation(NodeId),
}

/// One contributed update: the node it came from, its parameters, and
/// the weight it should carry in the aggregation (reputation-adjusted
/// by the round loop before this ever reaches an aggregator).
#[derive(Debug, Clone)]
pub struct WeightedUpdate {
    pub source: NodeId,
    pub parameters: DenseParameters,
    pub weight: f64,
}

pub trait Aggregator: Send + Sync {
    fn name(&self) -> &'static str;

    fn aggregate(&self, updates: &[WeightedUpdate]) -> Result<DenseParameters, AggregationError>;
}

/// Drops any update carrying the `BYPASS_MODEL_WEIGHT` sentinel: a
/// `Server` role's contribution counts toward the buffer's
/// completeness before it ever reaches an aggregator, but must never
/// enter a weighted mean, a coordinate-wise median, a trimmed mean, or
/// a Krum distance computation as a real vote.
pub(crate) fn exclude_bypass_weight(updates: &[WeightedUpdate]) -> Vec<WeightedUpdate> {
    updates.iter().filter(|u| u.weight.is_finite()).cloned().collect()
}

pub(crate) fn validate_equal_length(updates: &[WeightedUpdate]) -> Result<usize, AggregationError> {
    let mut iter = updates.iter();
    let first = iter.next().ok_or(AggregationError::Empty)?;
    let len = first.parameters.as_slice().len();
    for update in iter {
        let other_len = update.parameters.as_slice().len();
        if other_len != len {
            return Err(AggregationError::Incompatible(len, other_len));
        }
    }
    Ok(len)
}
