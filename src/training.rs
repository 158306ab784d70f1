//! The training backend interface: the
//! actual gradient-descent loop lives outside this crate, so role
//! behaviors only ever see it through this one-way trait.

use async_trait::async_trait;

use crate::parameter_store::DenseParameters;

/// Sentinel weight a `Server` role attaches to its own update: it
/// participates in the round so its parameters are visible to
/// everyone, but its own contribution should never be reputation-
/// scaled or counted toward the aggregation denominator.
pub const BYPASS_MODEL_WEIGHT: f64 = f64::INFINITY;

#[async_trait]
pub trait Trainer: Send + Sync {
    /// Evaluates the current local model against its held-out data,
    /// for metrics purposes only; does not change model state.
    async fn test(&self);

    /// Runs one local training pass, updating the model in place.
    async fn train(&self);

    fn model_parameters(&self) -> DenseParameters;

    fn model_weight(&self) -> f64;

    /// Replaces the local model outright with an aggregated or
    /// externally supplied one (used when a node is waiting for a
    /// global update rather than training locally).
    fn set_model_parameters(&self, parameters: DenseParameters);
}
