//! Engine: the per-node round loop state machine —
//! `Idle → Connecting → AwaitingFederation → Running → Finished` —
//! that owns every other subsystem and drives them through one
//! experiment.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::time;
use tracing::{debug, info, warn};

use crate::aggregation::{AggregationBuffer, Aggregator, PushAcceleration};
use crate::arbiter::{Priority, SACommand, SACommandKind, SuggestionArbiter};
use crate::comm::Comm;
use crate::controller::ControllerClient;
use crate::crash::CrashDump;
use crate::error::{Error, Result};
use crate::events::{EventBus, NodeEvent, SuggestionBarrier};
use crate::message::{
    Action, ConnectionAction, ControlAction, DiscoverAction, DiscoveryAction, FederationAction,
    LinkAction, Message, ModelAction, ReputationAction,
};
use crate::netsim::NetworkSim;
use crate::node_id::NodeId;
use crate::parameter_store::{DenseParameters, ParameterStore};
use crate::propagator::{PropagationPhase, Propagator};
use crate::reputation::signals::{latency_signal, message_count_signal, parameter_change_signal, similarity_signal};
use crate::reputation::{ActiveMetrics, ReputationEngine, SignalSet, StaticWeights, WeightingMode};
use crate::role::{RoleBehavior, RoundContext};
use crate::training::Trainer as TrainerBackend;

const BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const FEDERATION_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Minimum per-coordinate movement counted as "changed" when computing
/// the parameter-change-fraction reputation signal.
const PARAMETER_CHANGE_THRESHOLD: f64 = 0.05;

/// Registered situational-awareness channels the suggestion barrier
/// waits on each round: connection health (weak-link detection) and
/// reputation (score-driven disconnects).
const SUGGESTION_AGENTS: usize = 2;

/// The coarse lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Connecting,
    AwaitingFederation,
    Running,
    Finished,
}

/// Owns the comms table, the aggregation buffer, the reputation
/// engine, the propagator, the suggestion arbiter and the configured
/// role behavior, and drives them through one experiment's rounds.
pub struct Engine {
    local: NodeId,
    bootstrap: Vec<NodeId>,
    is_start: bool,
    total_rounds: u32,
    scenario_name: String,

    comm: Arc<Comm>,
    buffer: Arc<AggregationBuffer>,
    propagator: Mutex<Propagator>,
    reputation: Arc<ReputationEngine>,
    events: Arc<EventBus>,
    arbiter: Mutex<SuggestionArbiter>,
    /// Gates `resolve_suggestions` until both registered awareness
    /// channels — connection health and reputation — have reported in
    /// for the round, so a slow one can't get its suggestion clobbered
    /// by an early resolve.
    suggestion_barrier: SuggestionBarrier,

    federation_ready: Mutex<HashSet<NodeId>>,
    federation_started_tx: watch::Sender<bool>,
    federation_started_rx: watch::Receiver<bool>,

    with_reputation: bool,
    message_counts: Mutex<HashMap<NodeId, u32>>,
    arrival_latencies: Mutex<HashMap<NodeId, f64>>,
    this_round_parameters: Mutex<HashMap<NodeId, DenseParameters>>,
    last_parameters: Mutex<HashMap<NodeId, DenseParameters>>,
    round_start: Mutex<Instant>,
    /// Nodes believed ahead by round, accumulated by `maybe_push` and
    /// drained into the next cycle's `RoundContext::ahead`.
    push_ahead: Mutex<HashSet<NodeId>>,

    trainer: Arc<dyn TrainerBackend>,
    role: Arc<dyn RoleBehavior>,
    controller: Option<ControllerClient>,

    state: Mutex<EngineState>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local: NodeId,
        bootstrap: Vec<NodeId>,
        is_start: bool,
        total_rounds: u32,
        scenario_name: String,
        aggregator: Arc<dyn Aggregator>,
        aggregation_timeout: Duration,
        weighting: WeightingMode,
        initial_reputation: f64,
        active_metrics: ActiveMetrics,
        static_weights: StaticWeights,
        with_reputation: bool,
        trainer: Arc<dyn TrainerBackend>,
        role: Arc<dyn RoleBehavior>,
        controller: Option<ControllerClient>,
        sim: Option<Arc<NetworkSim>>,
    ) -> Arc<Self> {
        let (comm, mut inbox, mut closed) = Comm::new(local);
        let comm = match sim {
            Some(sim) => comm.with_network_sim(sim),
            None => comm,
        };

        let buffer = Arc::new(AggregationBuffer::new(local, aggregator, aggregation_timeout));
        let reputation = Arc::new(ReputationEngine::with_config(
            local,
            weighting,
            initial_reputation,
            active_metrics,
            static_weights,
        ));
        let (federation_started_tx, federation_started_rx) = watch::channel(false);

        let engine = Arc::new(Self {
            local,
            bootstrap,
            is_start,
            total_rounds,
            scenario_name,
            comm,
            buffer,
            propagator: Mutex::new(Propagator::new()),
            reputation,
            events: EventBus::new(),
            arbiter: Mutex::new(SuggestionArbiter::new()),
            suggestion_barrier: SuggestionBarrier::new(SUGGESTION_AGENTS),
            federation_ready: Mutex::new(HashSet::new()),
            federation_started_tx,
            federation_started_rx,
            with_reputation,
            message_counts: Mutex::new(HashMap::new()),
            arrival_latencies: Mutex::new(HashMap::new()),
            this_round_parameters: Mutex::new(HashMap::new()),
            last_parameters: Mutex::new(HashMap::new()),
            round_start: Mutex::new(Instant::now()),
            push_ahead: Mutex::new(HashSet::new()),
            trainer,
            role,
            controller,
            state: Mutex::new(EngineState::Idle),
        });

        {
            let engine = engine.clone();
            tokio::spawn(async move {
                while let Some((from, message)) = inbox.recv().await {
                    engine.handle_message(from, message).await;
                }
            });
        }
        {
            let comm = engine.comm.clone();
            tokio::spawn(async move {
                while let Some(peer) = closed.recv().await {
                    comm.reap(&peer);
                }
            });
        }

        engine
    }

    pub fn local_id(&self) -> NodeId {
        self.local
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub async fn state(&self) -> EngineState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: EngineState) {
        info!(?state, "engine state transition");
        *self.state.lock().await = state;
    }

    /// Starts listening for inbound dials, ahead of connecting to any
    /// bootstrap neighbor.
    pub async fn listen(&self, addr: SocketAddr) -> Result<()> {
        self.comm.listen(addr).await.map_err(Error::from)
    }

    /// Captures last-round state for a crash dump, for a fatal-error
    /// path in the binary entry point to write to disk.
    pub async fn crash_snapshot(&self, last_error: impl Into<String>) -> CrashDump {
        CrashDump {
            node: self.local,
            last_round: self.buffer.current_round().await,
            pending_buffer_keys: self.buffer.pending_keys().await,
            connected_peers: self.comm.all_peers(),
            last_error: last_error.into(),
        }
    }

    /// Drives the node through its full lifecycle: registers with the
    /// optional controller, connects to bootstrap neighbors, waits for
    /// the federation to start, runs every configured round, then
    /// reports completion.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if let Some(controller) = &self.controller {
            if let Err(error) = controller.register(self.local).await {
                warn!(%error, "failed to register with the controller");
            }
        }

        self.set_state(EngineState::Connecting).await;
        self.connect_bootstrap().await;

        self.set_state(EngineState::AwaitingFederation).await;
        if let Some(controller) = &self.controller {
            if let Err(error) = controller.wait_for_start().await {
                warn!(%error, "controller wait-for-start failed, proceeding on the overlay signal alone");
            }
        }
        self.await_federation().await;

        self.set_state(EngineState::Running).await;
        self.run_rounds().await;

        self.set_state(EngineState::Finished).await;
        self.finish().await?;

        Ok(())
    }

    /// Closes every active connection. Called on SIGTERM/SIGINT; the
    /// round loop task is expected to be aborted by the caller
    /// alongside this.
    pub async fn shutdown(&self) {
        info!("shutting down, closing all connections");
        for peer in self.comm.peers() {
            self.comm.disconnect(&peer);
        }
    }

    async fn connect_bootstrap(&self) {
        loop {
            for neighbor in &self.bootstrap {
                if !self.comm.is_connected(neighbor) {
                    if let Err(error) = self.comm.connect(*neighbor, true).await {
                        warn!(%neighbor, %error, "bootstrap dial failed, will retry");
                    }
                }
            }
            if self.bootstrap.is_empty() || self.comm.connection_count() > 0 {
                break;
            }
            time::sleep(BOOTSTRAP_RETRY_INTERVAL).await;
        }

        let discover = Message::new(self.local, Action::Discovery(DiscoveryAction::Discover));
        self.comm.broadcast(discover);
    }

    /// Broadcasts readiness, then either waits (as the designated start
    /// node) for every bootstrap peer to report readiness before
    /// broadcasting `federation_start`, or blocks until that broadcast
    /// is observed from someone else.
    async fn await_federation(&self) {
        let ready = Message::new(self.local, Action::Federation(FederationAction::FederationReady));
        self.comm.broadcast(ready);

        if self.is_start {
            let required: HashSet<NodeId> = self.bootstrap.iter().copied().collect();
            loop {
                let satisfied = {
                    let got = self.federation_ready.lock().await;
                    required.is_subset(&got)
                };
                if satisfied {
                    break;
                }
                time::sleep(FEDERATION_POLL_INTERVAL).await;
            }
            let start = Message::new(self.local, Action::Federation(FederationAction::FederationStart));
            self.comm.broadcast(start);
            let _ = self.federation_started_tx.send(true);
        } else {
            let mut rx = self.federation_started_rx.clone();
            if !*rx.borrow() {
                let _ = rx.changed().await;
            }
        }

        let federation: HashSet<NodeId> = self.comm.peers().into_iter().collect();
        self.buffer.update_federation_nodes(federation).await;
        self.propagator.lock().await.set_phase(PropagationPhase::Stable);
    }

    async fn run_rounds(self: &Arc<Self>) {
        let mut round = 0i32;
        while round < self.total_rounds as i32 {
            let buffer_round = self.buffer.current_round().await;
            if buffer_round > round {
                round = buffer_round;
            }
            self.buffer.advance_round(round).await;
            *self.round_start.lock().await = Instant::now();

            let federation_size = self.comm.connection_count() + 1;
            self.events
                .publish(NodeEvent::RoundStart { round, federation_size })
                .await;

            let ahead: Vec<NodeId> = self.push_ahead.lock().await.drain().collect();

            {
                let mut propagator = self.propagator.lock().await;
                let phase_before = propagator.phase();
                let ctx = RoundContext::new(
                    self.local,
                    round,
                    self.trainer.as_ref(),
                    &self.comm,
                    &self.buffer,
                    &propagator,
                    ahead,
                );
                self.role.extended_cycle(&ctx).await;
                if phase_before == PropagationPhase::Push {
                    propagator.set_phase(PropagationPhase::Stable);
                }
            }

            self.events.publish(NodeEvent::AggregationDone { round }).await;

            self.suggestion_barrier.reset(SUGGESTION_AGENTS);
            self.score_round_reputation(round).await;
            self.connection_awareness_tick();
            self.suggestion_barrier.wait().await;
            self.resolve_suggestions().await;

            self.events.publish(NodeEvent::RoundEnd { round }).await;

            round = self.buffer.current_round().await.max(round) + 1;
        }
    }

    /// Called when a future-round update arrives while this node is
    /// still on an earlier round: checks whether the buffer thinks a
    /// slow or fast push is warranted and, if so, switches the
    /// propagator into its push phase so the next cycle reaches the
    /// peers this node now believes are ahead.
    async fn maybe_push(&self, from: NodeId, observed_round: i32) {
        let current_round = self.buffer.current_round().await;
        if observed_round <= current_round {
            return;
        }

        let federation_size = self.buffer.federation_size().await;
        let quorum = federation_size.saturating_sub(1);
        let waiting_sources = self.buffer.future_entry_sources(observed_round).await;
        let acceleration = if waiting_sources.len() >= quorum {
            PushAcceleration::Fast
        } else {
            PushAcceleration::Slow
        };

        if let Some(target_round) = self.buffer.aggregation_push_available(acceleration).await {
            info!(target_round, ?acceleration, "push strategy engaged");
            let mut ahead = self.push_ahead.lock().await;
            ahead.extend(waiting_sources);
            ahead.insert(from);
            drop(ahead);
            self.propagator.lock().await.set_phase(PropagationPhase::Push);
        }
    }

    async fn finish(&self) -> Result<()> {
        self.events.publish(NodeEvent::ExperimentFinish).await;
        self.trainer.test().await;

        if let Some(controller) = &self.controller {
            if let Err(error) = controller.finished(&self.scenario_name, self.local).await {
                warn!(%error, "failed to report completion to the controller");
            }
        }

        Ok(())
    }

    /// Folds this round's per-peer message counts, arrival latencies
    /// and parameter movement into the reputation engine, then clears
    /// the round-scoped bookkeeping for the next round.
    async fn score_round_reputation(&self, round: i32) {
        if !self.with_reputation {
            self.suggestion_barrier.notify_all_suggestions_done();
            return;
        }

        let counts = self.message_counts.lock().await.clone();
        let latencies = self.arrival_latencies.lock().await.clone();
        let this_round = self.this_round_parameters.lock().await.clone();
        let local_parameters = self.trainer.model_parameters();
        let mut last_parameters = self.last_parameters.lock().await;

        let count_values: Vec<u32> = counts.values().copied().collect();
        let max_latency = latencies.values().copied().fold(0.0_f64, f64::max);

        for (peer, parameters) in this_round.iter() {
            let this_count = counts.get(peer).copied().unwrap_or(0);
            let latency = latencies.get(peer).copied().unwrap_or(max_latency);

            let fraction_changed = last_parameters
                .get(peer)
                .and_then(|previous| fraction_changed(previous, parameters))
                .unwrap_or(0.0);

            let similarity = similarity_signal(parameters, &local_parameters).unwrap_or(0.5);

            let signals = SignalSet {
                message_count: message_count_signal(&count_values, this_count),
                latency: latency_signal(latency, max_latency, None),
                parameter_change: parameter_change_signal(fraction_changed, PARAMETER_CHANGE_THRESHOLD),
                similarity,
            };

            let score = self.reputation.record_round(*peer, round, signals);
            last_parameters.insert(*peer, parameters.clone());

            if score < crate::reputation::REJECTION_THRESHOLD {
                self.arbiter.lock().await.register(SACommand::connection(
                    *peer,
                    SACommandKind::Disconnect,
                    Priority::High,
                ));
            }
        }
        drop(last_parameters);

        self.message_counts.lock().await.clear();
        self.arrival_latencies.lock().await.clear();
        self.this_round_parameters.lock().await.clear();

        self.suggestion_barrier.notify_all_suggestions_done();
    }

    /// Connection-health awareness channel: reports into the barrier
    /// every round. Weak-link suggestions it may have produced are
    /// registered synchronously as `WeakLink` control messages arrive
    /// in `handle_message`, ahead of this round-end checkpoint.
    fn connection_awareness_tick(&self) {
        self.suggestion_barrier.notify_all_suggestions_done();
    }

    async fn resolve_suggestions(&self) {
        let mut arbiter = self.arbiter.lock().await;
        let accepted = arbiter.resolve();
        arbiter.clear();
        drop(arbiter);

        for command in accepted {
            match command.kind {
                SACommandKind::Disconnect => self.comm.disconnect(&command.peer),
                SACommandKind::Reconnect => {
                    if let Err(error) = self.comm.connect(command.peer, true).await {
                        debug!(peer = %command.peer, %error, "failed to honor a reconnect suggestion");
                    }
                }
                SACommandKind::Maintain | SACommandKind::Search => {
                    debug!(peer = %command.peer, kind = ?command.kind, "situational-awareness suggestion noted");
                }
                SACommandKind::AdjustWeight | SACommandKind::DiscardWeight => {
                    debug!(
                        peer = %command.peer,
                        kind = ?command.kind,
                        weight = ?command.weight,
                        "aggregation-weight suggestion noted for the next round",
                    );
                }
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, from: NodeId, message: Message) {
        if !self.comm.admit_and_forward(from, &message) {
            debug!(%from, action = message.action.name(), "dropping duplicate message");
            return;
        }
        *self.message_counts.lock().await.entry(from).or_insert(0) += 1;

        match message.action {
            Action::Discovery(DiscoveryAction::Discover) => {
                if !self.comm.is_connected(&from) {
                    if let Err(error) = self.comm.connect(from, true).await {
                        debug!(%from, %error, "failed to connect back to a discovering peer");
                    }
                }
            }
            Action::Discovery(DiscoveryAction::Register) => {
                self.events.publish(NodeEvent::NodeFound { peer: from }).await;
            }
            Action::Discovery(DiscoveryAction::Deregister) => {
                self.comm.disconnect(&from);
                self.events
                    .publish(NodeEvent::UpdateNeighbor { peer: from, removed: true })
                    .await;
            }
            Action::Control(ControlAction::Alive) => {
                debug!(%from, "heartbeat received");
            }
            Action::Control(ControlAction::Overhead) => {
                debug!(%from, "overhead report received");
            }
            Action::Control(ControlAction::Mobility) => {
                debug!(%from, "mobility update received");
            }
            Action::Control(ControlAction::Recovery) => {
                info!(%from, "peer reported recovery");
            }
            Action::Control(ControlAction::WeakLink) => {
                self.arbiter
                    .lock()
                    .await
                    .register(SACommand::connection(from, SACommandKind::Disconnect, Priority::Medium));
            }
            Action::Federation(FederationAction::FederationReady) => {
                self.federation_ready.lock().await.insert(from);
            }
            Action::Federation(FederationAction::FederationStart) => {
                let _ = self.federation_started_tx.send(true);
            }
            Action::Federation(FederationAction::FederationModelsIncluded) => {
                debug!(%from, "federation models-included notice received");
            }
            Action::Model(ModelAction::Init) | Action::Model(ModelAction::Update) => {
                self.handle_model_update(from, &message).await;
            }
            Action::Model(ModelAction::LeadershipTransfer) => {
                debug!(%from, "leadership transfer received");
            }
            Action::Connection(ConnectionAction::Connect) | Action::Connection(ConnectionAction::LateConnect) => {
                if let Err(error) = self.comm.connect(from, true).await {
                    debug!(%from, %error, "failed to honor a connect request");
                }
            }
            Action::Connection(ConnectionAction::Disconnect) => {
                self.comm.disconnect(&from);
            }
            Action::Connection(ConnectionAction::Restructure) => {
                debug!(%from, "topology restructure hint received");
            }
            Action::Discover(DiscoverAction::DiscoverCandidates) => {
                self.events.publish(NodeEvent::NodeFound { peer: from }).await;
            }
            Action::Offer(_) => {
                debug!(%from, action = message.action.name(), "offer message received");
            }
            Action::Link(LinkAction::ConnectTo) => {
                if let Some(target) = message.args.first().and_then(|s| s.parse::<NodeId>().ok()) {
                    if let Err(error) = self.comm.connect(target, true).await {
                        debug!(%target, %error, "failed to honor a link connect-to");
                    }
                }
            }
            Action::Link(LinkAction::DisconnectFrom) => {
                if let Some(target) = message.args.first().and_then(|s| s.parse::<NodeId>().ok()) {
                    self.comm.disconnect(&target);
                }
            }
            Action::Reputation(ReputationAction::Share) => {
                let feedback: Vec<f64> = message.args.iter().filter_map(|s| s.parse().ok()).collect();
                if let Some(round) = message.round {
                    self.reputation.absorb_feedback(round, &feedback);
                }
            }
        }
    }

    async fn handle_model_update(&self, from: NodeId, message: &Message) {
        let Some(round) = message.round else {
            debug!(%from, "model update missing a round, dropping");
            return;
        };
        let Some(weight) = message.weight else {
            debug!(%from, "model update missing a weight, dropping");
            return;
        };
        let Some(parameters) = message.params.as_deref().and_then(decode_parameters) else {
            debug!(%from, "model update carried no decodable parameters, dropping");
            return;
        };

        let current_round = self.buffer.current_round().await;
        if round == current_round {
            let arrival = self.round_start.lock().await.elapsed().as_secs_f64();
            self.arrival_latencies.lock().await.insert(from, arrival);
            self.this_round_parameters.lock().await.insert(from, parameters.clone());
        }

        if !self.reputation.accepts(&from) {
            debug!(%from, "update rejected by the reputation engine");
            return;
        }

        let scaled_weight = if weight.is_finite() && self.with_reputation {
            weight * self.reputation.weight_of(&from)
        } else {
            weight
        };

        if round > current_round {
            self.buffer
                .include_next_model_in_buffer(from, parameters, scaled_weight, round)
                .await;
            self.maybe_push(from, round).await;
        } else if round == current_round {
            if let Err(error) = self
                .buffer
                .include_model_in_buffer(from, parameters, scaled_weight, round, false)
                .await
            {
                debug!(%from, %error, "failed to include update in the buffer");
            }
        } else {
            debug!(%from, round, current_round, "dropping update for a past round");
        }
    }
}

fn decode_parameters(bytes: &[u8]) -> Option<DenseParameters> {
    rmp_serde::from_slice::<Vec<f64>>(bytes).ok().map(DenseParameters::new)
}

fn fraction_changed(previous: &DenseParameters, current: &DenseParameters) -> Option<f64> {
    let (a, b) = (previous.as_slice(), current.as_slice());
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let changed = a
        .iter()
        .zip(b)
        .filter(|(x, y)| (*x - *y).abs() > PARAMETER_CHANGE_THRESHOLD)
        .count();
    Some(changed as f64 / a.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::fedavg::FedAvg;
    use async_trait::async_trait;

    fn node(addr: &str) -> NodeId {
        addr.parse().unwrap()
    }

    struct StubTrainer;

    #[async_trait]
    impl TrainerBackend for StubTrainer {
        async fn test(&self) {}
        async fn train(&self) {}
        fn model_parameters(&self) -> DenseParameters {
            DenseParameters::new(vec![1.0, 2.0])
        }
        fn model_weight(&self) -> f64 {
            1.0
        }
        fn set_model_parameters(&self, _parameters: DenseParameters) {}
    }

    fn engine(local: NodeId, bootstrap: Vec<NodeId>, is_start: bool) -> Arc<Engine> {
        engine_with_reputation(local, bootstrap, is_start, true)
    }

    fn engine_with_reputation(local: NodeId, bootstrap: Vec<NodeId>, is_start: bool, with_reputation: bool) -> Arc<Engine> {
        Engine::new(
            local,
            bootstrap,
            is_start,
            1,
            "test-scenario".to_string(),
            Arc::new(FedAvg),
            Duration::from_millis(50),
            WeightingMode::Static,
            1.0,
            ActiveMetrics::default(),
            StaticWeights::default(),
            with_reputation,
            Arc::new(StubTrainer),
            Arc::new(crate::role::IdleOrProxy),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn a_node_with_no_bootstrap_neighbors_reaches_running_without_blocking() {
        let engine = engine(node("127.0.0.1:9100"), Vec::new(), true);
        engine.run().await.unwrap();
        assert_eq!(engine.state().await, EngineState::Finished);
    }

    #[tokio::test]
    async fn suggestion_barrier_gating_does_not_hang_with_reputation_disabled() {
        let engine = engine_with_reputation(node("127.0.0.1:9101"), Vec::new(), true, false);
        engine.run().await.unwrap();
        assert_eq!(engine.state().await, EngineState::Finished);
    }

    #[test]
    fn fraction_changed_counts_coordinates_past_the_threshold() {
        let previous = DenseParameters::new(vec![0.0, 0.0, 0.0]);
        let current = DenseParameters::new(vec![0.0, 1.0, 0.2]);
        let fraction = fraction_changed(&previous, &current).unwrap();
        assert!((fraction - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn fraction_changed_is_none_on_length_mismatch() {
        let previous = DenseParameters::new(vec![0.0]);
        let current = DenseParameters::new(vec![0.0, 1.0]);
        assert!(fraction_changed(&previous, &current).is_none());
    }
}
