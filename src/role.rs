//! Role Behaviors: the single `extended_cycle()` method
//! the round loop invokes once per round, dispatched on the node's
//! configured role.
//!
//! Every role ultimately performs the same handful of steps — submit,
//! propagate, aggregate — in a different order or with a different
//! subset enabled, so they share one `RoleBehavior` trait with a
//! single entry point rather than a big enum of duty kinds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info};

use crate::aggregation::AggregationBuffer;
use crate::comm::Comm;
use crate::message::{Action, ControlAction, Message, ModelAction};
use crate::node_id::NodeId;
use crate::parameter_store::DenseParameters;
use crate::propagator::Propagator;
use crate::training::{Trainer as TrainerBackend, BYPASS_MODEL_WEIGHT};

type WeightTransform = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Everything a role behavior needs to run one round: the training
/// backend, the comms/aggregation machinery shared with the round
/// loop, and which round this is.
pub struct RoundContext<'a> {
    pub local: NodeId,
    pub round: i32,
    pub trainer: &'a dyn TrainerBackend,
    pub comm: &'a Arc<Comm>,
    pub buffer: &'a AggregationBuffer,
    pub propagator: &'a Propagator,
    /// Nodes this one believes are already ahead by round, learned
    /// from future-round updates buffered before this round started;
    /// fed to the propagator so a push-phase cycle targets them.
    pub ahead: Vec<NodeId>,
    /// Applied to the reported weight just before submission, letting
    /// a `Malicious` role's attack falsify it without the impersonated
    /// role's own cycle needing to know it is being wrapped.
    weight_transform: Option<WeightTransform>,
}

impl<'a> RoundContext<'a> {
    pub fn new(
        local: NodeId,
        round: i32,
        trainer: &'a dyn TrainerBackend,
        comm: &'a Arc<Comm>,
        buffer: &'a AggregationBuffer,
        propagator: &'a Propagator,
        ahead: Vec<NodeId>,
    ) -> Self {
        Self {
            local,
            round,
            trainer,
            comm,
            buffer,
            propagator,
            ahead,
            weight_transform: None,
        }
    }

    fn with_weight_transform(&self, transform: WeightTransform) -> Self {
        Self {
            local: self.local,
            round: self.round,
            trainer: self.trainer,
            comm: self.comm,
            buffer: self.buffer,
            propagator: self.propagator,
            ahead: self.ahead.clone(),
            weight_transform: Some(transform),
        }
    }

    /// Submits this node's own update into the aggregation buffer and
    /// propagates it to whichever neighbors the propagator currently
    /// selects. This is the "submit → propagate" step shared by every
    /// non-idle role.
    async fn submit_and_propagate(&self, weight: f64) {
        let weight = match &self.weight_transform {
            Some(transform) => transform(weight),
            None => weight,
        };
        let parameters = self.trainer.model_parameters();

        if let Err(error) = self
            .buffer
            .include_model_in_buffer(self.local, parameters.clone(), weight, self.round, true)
            .await
        {
            debug!(%error, "failed to include own update in the local buffer");
        }

        let federation: Vec<NodeId> = self.comm.peers();
        let recipients = self.propagator.select_recipients(&federation, &federation, &self.ahead);
        let message = Message::new(self.local, Action::Model(ModelAction::Update))
            .with_round(self.round)
            .with_weight(weight)
            .with_params(encode_parameters(&parameters));

        for peer in recipients {
            if let Err(error) = self.comm.send_to(&peer, message.clone()) {
                debug!(%peer, %error, "failed to propagate own update");
            }
        }
    }

    async fn await_aggregation(&self) -> DenseParameters {
        match self.buffer.get_aggregation().await {
            Ok(parameters) => {
                self.trainer.set_model_parameters(parameters.clone());
                parameters
            }
            Err(error) => {
                debug!(%error, "aggregation did not complete this round, keeping local model");
                self.trainer.model_parameters()
            }
        }
    }
}

fn encode_parameters(parameters: &DenseParameters) -> bytes::Bytes {
    rmp_serde::to_vec_named(parameters.as_slice())
        .map(bytes::Bytes::from)
        .unwrap_or_default()
}

#[async_trait]
pub trait RoleBehavior: Send + Sync {
    async fn extended_cycle(&self, ctx: &RoundContext<'_>);
}

/// Trains locally every round, contributing a normally weighted
/// update, and never aggregates on anyone else's behalf.
pub struct Trainer;

#[async_trait]
impl RoleBehavior for Trainer {
    async fn extended_cycle(&self, ctx: &RoundContext<'_>) {
        ctx.trainer.test().await;
        ctx.trainer.train().await;
        ctx.submit_and_propagate(ctx.trainer.model_weight()).await;
        ctx.await_aggregation().await;
    }
}

/// Trains locally and additionally runs the aggregation buffer that
/// produces the federation's next global model; behaviorally
/// identical to `Trainer` from this node's own perspective (the
/// aggregation role difference lives in which nodes the federation
/// designates to wait on, not in what this node itself does).
pub struct Aggregator;

#[async_trait]
impl RoleBehavior for Aggregator {
    async fn extended_cycle(&self, ctx: &RoundContext<'_>) {
        ctx.trainer.test().await;
        ctx.trainer.train().await;
        ctx.submit_and_propagate(ctx.trainer.model_weight()).await;
        ctx.await_aggregation().await;
    }
}

/// Trains, aggregates, and — once its own aggregation completes —
/// hands leadership for the next round to its first neighbor via a
/// `model/leadership_transfer` message.
pub struct TrainerAggregator;

#[async_trait]
impl RoleBehavior for TrainerAggregator {
    async fn extended_cycle(&self, ctx: &RoundContext<'_>) {
        ctx.trainer.test().await;
        ctx.trainer.train().await;
        ctx.submit_and_propagate(ctx.trainer.model_weight()).await;
        ctx.await_aggregation().await;

        if let Some(first_neighbor) = ctx.comm.peers().into_iter().next() {
            let message = Message::new(ctx.local, Action::Model(ModelAction::LeadershipTransfer))
                .with_round(ctx.round);
            if let Err(error) = ctx.comm.send_to(&first_neighbor, message) {
                debug!(%first_neighbor, %error, "failed to send leadership transfer");
            }
        }
    }
}

/// Contributes its parameters as a fixed reference model rather than a
/// locally trained one, tagged with `BYPASS_MODEL_WEIGHT` so the
/// aggregator excludes it from the weighted mean while still counting
/// it toward buffer completeness.
pub struct Server;

#[async_trait]
impl RoleBehavior for Server {
    async fn extended_cycle(&self, ctx: &RoundContext<'_>) {
        ctx.trainer.test().await;
        ctx.submit_and_propagate(BYPASS_MODEL_WEIGHT).await;
        ctx.await_aggregation().await;
    }
}

/// Neither trains nor submits an update; only waits for the round's
/// aggregation to complete so its local model stays current.
pub struct IdleOrProxy;

#[async_trait]
impl RoleBehavior for IdleOrProxy {
    async fn extended_cycle(&self, ctx: &RoundContext<'_>) {
        ctx.await_aggregation().await;
    }
}

/// An attack wraps rather than replaces the cycle of the role a
/// malicious node is impersonating.
#[async_trait]
pub trait AttackStrategy: Send + Sync {
    /// Runs before the impersonated role's own cycle.
    async fn before_cycle(&self, ctx: &RoundContext<'_>);

    /// Adjusts the weight a submission will report, letting an attack
    /// falsify it without the core treating the falsified value any
    /// differently from a genuine one.
    fn tamper_weight(&self, weight: f64) -> f64 {
        weight
    }
}

/// Sleeps before letting the wrapped cycle propagate anything,
/// widening the arrival-latency signal the reputation engine scores
/// this node on (`communications/delayerattack.py`).
pub struct DelayAttack {
    pub delay: Duration,
}

#[async_trait]
impl AttackStrategy for DelayAttack {
    async fn before_cycle(&self, _ctx: &RoundContext<'_>) {
        tokio::time::sleep(self.delay).await;
    }
}

/// Sends duplicate control messages to every neighbor before the
/// cycle runs, exercising the dedup ring and a neighbor's
/// message-count reputation signal (`communications/floodingattack.py`).
pub struct FloodAttack {
    pub duplicates: u32,
}

#[async_trait]
impl AttackStrategy for FloodAttack {
    async fn before_cycle(&self, ctx: &RoundContext<'_>) {
        let message = Message::new(ctx.local, Action::Control(ControlAction::Alive)).with_round(ctx.round);
        for peer in ctx.comm.peers() {
            for _ in 0..self.duplicates {
                if let Err(error) = ctx.comm.send_to(&peer, message.clone()) {
                    debug!(%peer, %error, "flood attack send failed");
                }
            }
        }
    }
}

/// Perturbs the weight this node reports for its own update — the
/// opaque parameter blob itself is untouched since parameters cross
/// the `ParameterStore` boundary unmodified, so this targets the one
/// numeric field the core exposes (`model/noiseinjection.py`).
pub struct NoiseInjectionAttack {
    pub magnitude: f64,
}

#[async_trait]
impl AttackStrategy for NoiseInjectionAttack {
    async fn before_cycle(&self, _ctx: &RoundContext<'_>) {}

    fn tamper_weight(&self, weight: f64) -> f64 {
        let noise = rand::thread_rng().gen_range(-self.magnitude..=self.magnitude);
        (weight + noise).max(0.0)
    }
}

/// Reports a fixed, falsified weight regardless of the trainer's own
/// assessment (`addons/attacks/attacks.py`).
pub struct WeightTamperAttack {
    pub reported_weight: f64,
}

#[async_trait]
impl AttackStrategy for WeightTamperAttack {
    async fn before_cycle(&self, _ctx: &RoundContext<'_>) {}

    fn tamper_weight(&self, _weight: f64) -> f64 {
        self.reported_weight
    }
}

/// Runs a configured attack's `before_cycle` hook, then the cycle of
/// whichever role this malicious node is impersonating, substituting
/// the attack's (possibly tampered) weight for the trainer's own.
pub struct Malicious {
    pub attack: Arc<dyn AttackStrategy>,
    pub impersonating: Arc<dyn RoleBehavior>,
}

#[async_trait]
impl RoleBehavior for Malicious {
    async fn extended_cycle(&self, ctx: &RoundContext<'_>) {
        info!("executing malicious cycle under an impersonated role");
        self.attack.before_cycle(ctx).await;

        let attack = self.attack.clone();
        let wrapped = ctx.with_weight_transform(Arc::new(move |weight| attack.tamper_weight(weight)));
        self.impersonating.extended_cycle(&wrapped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_tamper_attack_ignores_the_reported_weight() {
        let attack = WeightTamperAttack { reported_weight: 0.0 };
        assert_eq!(attack.tamper_weight(100.0), 0.0);
    }

    #[test]
    fn noise_injection_attack_never_produces_a_negative_weight() {
        let attack = NoiseInjectionAttack { magnitude: 1000.0 };
        for _ in 0..100 {
            assert!(attack.tamper_weight(0.5) >= 0.0);
        }
    }
}
