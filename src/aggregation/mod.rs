//! Aggregation Buffer: collects per-round model updates
//! from the current federation, tracks updates that arrive early for
//! a future round, and hands the configured `Aggregator` a complete
//! set once every expected peer (or an accepted catch-up shortcut)
//! says so.
//!
//! State is split into three independently-locked regions:
//! `control` (round/federation/waiting-global-update), `pending`
//! (this round's buffer) and `future` (catch-up buffer for rounds
//! ahead of us), with a `tokio::sync::Notify` pair signaling
//! completion to whichever task is waiting on it.

pub mod aggregator;
pub mod fedavg;
pub mod krum;
pub mod median;
pub mod trimmed_mean;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time;
use tracing::{debug, info};

pub use aggregator::{AggregationError, Aggregator, WeightedUpdate};

use crate::node_id::NodeId;
use crate::parameter_store::DenseParameters;

/// How aggressively a desynchronized node tries to catch up to the
/// rest of the federation once it notices it's behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAcceleration {
    /// Stop waiting for the remaining updates this round and proceed
    /// with whatever has arrived; don't jump ahead.
    Slow,
    /// Atomically reseed the pending buffer from this node's own
    /// update plus whatever future-round updates have already
    /// arrived, and advance straight to that round.
    Fast,
}

struct Control {
    round: i32,
    federation: HashSet<NodeId>,
    waiting_global_update: bool,
}

struct PendingEntry {
    parameters: DenseParameters,
    weight: f64,
}

struct FutureEntry {
    source: NodeId,
    parameters: DenseParameters,
    weight: f64,
}

pub struct AggregationBuffer {
    local: NodeId,
    aggregator: Arc<dyn Aggregator>,
    control: Mutex<Control>,
    pending: Mutex<HashMap<NodeId, PendingEntry>>,
    future: Mutex<BTreeMap<i32, Vec<FutureEntry>>>,
    done: Notify,
    push_skip: Notify,
    aggregation_timeout: Duration,
}

impl AggregationBuffer {
    pub fn new(local: NodeId, aggregator: Arc<dyn Aggregator>, aggregation_timeout: Duration) -> Self {
        Self {
            local,
            aggregator,
            control: Mutex::new(Control {
                round: 0,
                federation: HashSet::new(),
                waiting_global_update: false,
            }),
            pending: Mutex::new(HashMap::new()),
            future: Mutex::new(BTreeMap::new()),
            done: Notify::new(),
            push_skip: Notify::new(),
            aggregation_timeout,
        }
    }

    pub async fn current_round(&self) -> i32 {
        self.control.lock().await.round
    }

    /// Snapshot of the peers with an update already in this round's
    /// pending buffer, for crash-dump diagnostics.
    pub async fn pending_keys(&self) -> Vec<NodeId> {
        self.pending.lock().await.keys().copied().collect()
    }

    /// Replaces the federation set for a fresh round and clears the
    /// pending buffer.
    pub async fn update_federation_nodes(&self, federation: HashSet<NodeId>) {
        let mut control = self.control.lock().await;
        control.federation = federation;
        let mut pending = self.pending.lock().await;
        pending.clear();
    }

    /// Called when the federation shrinks mid-round: if every
    /// still-pending node has in fact left the federation, there's
    /// nothing left to wait for, so the round can complete early
    /// instead of idling out the full aggregation timeout.
    pub async fn notify_federation_shrunk(&self, new_federation: HashSet<NodeId>) {
        let mut control = self.control.lock().await;
        let removed: HashSet<NodeId> = control.federation.difference(&new_federation).copied().collect();
        if removed.is_empty() {
            control.federation = new_federation;
            return;
        }

        let pending = self.pending.lock().await;
        let still_missing: HashSet<NodeId> = new_federation
            .iter()
            .filter(|n| !pending.contains_key(n))
            .copied()
            .collect();

        info!(?removed, "nodes removed from the federation");
        control.federation = new_federation;

        if still_missing.is_empty() && !pending.is_empty() {
            info!("no outstanding updates remain after federation shrink, completing round");
            self.done.notify_one();
        }
    }

    pub async fn set_waiting_global_update(&self) {
        self.control.lock().await.waiting_global_update = true;
    }

    pub async fn reset(&self) {
        let mut control = self.control.lock().await;
        control.federation.clear();
        control.waiting_global_update = false;
        self.pending.lock().await.clear();
    }

    async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Includes a received update in the current round's buffer, or
    /// overwrites the buffer outright if this node is waiting for an
    /// externally-aggregated global model.
    pub async fn include_model_in_buffer(
        &self,
        source: NodeId,
        parameters: DenseParameters,
        weight: f64,
        round: i32,
        local: bool,
    ) -> Result<bool, AggregationError> {
        if round == -1 {
            debug!(%source, "ignoring update from the initialization round");
            return Ok(false);
        }

        let waiting_global = {
            let control = self.control.lock().await;
            control.waiting_global_update
        };

        if waiting_global && !local {
            let mut pending = self.pending.lock().await;
            pending.clear();
            pending.insert(source, PendingEntry { parameters, weight });
            self.control.lock().await.waiting_global_update = false;
            self.done.notify_one();
            return Ok(true);
        }

        let federation_size = self.control.lock().await.federation.len();
        let in_federation = self.control.lock().await.federation.contains(&source);
        if !in_federation {
            debug!(%source, "update from a node outside the current federation, ignoring");
            return Ok(false);
        }

        {
            let mut pending = self.pending.lock().await;
            if pending.len() >= federation_size && !pending.contains_key(&source) {
                debug!(%source, "buffer already full, ignoring late update");
                return Ok(false);
            }
            pending
                .entry(source)
                .or_insert(PendingEntry { parameters, weight });
        }

        self.absorb_future_updates_for_current_round().await;

        let complete = self.pending_count().await >= federation_size;
        if complete {
            info!(round, "all updates received, aggregation buffer full");
            self.done.notify_one();
        }
        Ok(complete)
    }

    /// Buffers an update for a round that hasn't started locally yet
    ///.
    pub async fn include_next_model_in_buffer(
        &self,
        source: NodeId,
        parameters: DenseParameters,
        weight: f64,
        round: i32,
    ) {
        let mut future = self.future.lock().await;
        future.entry(round).or_insert_with(Vec::new).push(FutureEntry {
            source,
            parameters,
            weight,
        });
    }

    async fn absorb_future_updates_for_current_round(&self) {
        let round = self.control.lock().await.round;
        let entries = {
            let mut future = self.future.lock().await;
            future.remove(&round)
        };
        let Some(entries) = entries else {
            future_gc(&self.future, round).await;
            return;
        };

        let federation = self.control.lock().await.federation.clone();
        let mut pending = self.pending.lock().await;
        for entry in entries {
            if federation.contains(&entry.source) && !pending.contains_key(&entry.source) {
                pending.insert(
                    entry.source,
                    PendingEntry {
                        parameters: entry.parameters,
                        weight: entry.weight,
                    },
                );
            }
        }
        drop(pending);
        future_gc(&self.future, round).await;
    }

    /// Waits until the buffer is complete (or a push strategy signals
    /// that waiting further is pointless), then hands everything
    /// collected to the configured aggregator and clears the buffer.
    pub async fn get_aggregation(&self) -> Result<DenseParameters, AggregationError> {
        let round = self.control.lock().await.round;

        tokio::select! {
            _ = self.done.notified() => {}
            _ = self.push_skip.notified() => {
                debug!("skipping aggregation wait due to detected desynchronization");
            }
            _ = time::sleep(self.aggregation_timeout) => {
                return Err(AggregationError::Timeout(round));
            }
        }

        let waiting_global = self.control.lock().await.waiting_global_update;
        let mut pending = self.pending.lock().await;

        if waiting_global && pending.len() == 1 {
            let (_, entry) = pending.drain().next().expect("checked len == 1 above");
            return Ok(entry.parameters);
        }

        let updates: Vec<WeightedUpdate> = pending
            .drain()
            .map(|(source, entry)| WeightedUpdate {
                source,
                parameters: entry.parameters,
                weight: entry.weight,
            })
            .collect();
        drop(pending);

        if updates.is_empty() {
            return Err(AggregationError::Empty);
        }

        self.aggregator.aggregate(&updates)
    }

    /// Evaluates whether this node should jump ahead of the round it
    /// thinks it's on, because the rest of the federation has clearly
    /// moved on without it.
    pub async fn aggregation_push_available(&self, acceleration: PushAcceleration) -> Option<i32> {
        let current_round = self.control.lock().await.round;
        let federation_size = self.control.lock().await.federation.len();
        let pending_count = self.pending_count().await;

        if pending_count >= federation_size {
            return None;
        }

        let target_round = {
            let future = self.future.lock().await;
            future
                .iter()
                .find(|(round, entries)| {
                    **round - current_round > 1 || entries.len() >= federation_size.saturating_sub(1)
                })
                .map(|(round, _)| *round)
        };

        let Some(target_round) = target_round else {
            return None;
        };

        match acceleration {
            PushAcceleration::Slow => {
                info!(current_round, target_round, "slow push: skipping this round's wait");
                self.push_skip.notify_one();
                Some(current_round)
            }
            PushAcceleration::Fast => {
                self.fast_push_to(target_round).await;
                Some(target_round)
            }
        }
    }

    async fn fast_push_to(&self, target_round: i32) {
        let mut control = self.control.lock().await;
        let mut pending = self.pending.lock().await;
        let mut future = self.future.lock().await;

        let own_update = pending.remove(&self.local);
        pending.clear();
        if let Some(own) = own_update {
            pending.insert(self.local, own);
        }

        if let Some(entries) = future.remove(&target_round) {
            for entry in entries {
                pending.insert(
                    entry.source,
                    PendingEntry {
                        parameters: entry.parameters,
                        weight: entry.weight,
                    },
                );
            }
        }

        future.retain(|round, _| *round > target_round);
        control.round = target_round;
        info!(target_round, "fast push: advanced past stale rounds");
        drop(future);
        drop(pending);
        drop(control);
        self.push_skip.notify_one();
    }

    pub async fn advance_round(&self, round: i32) {
        self.control.lock().await.round = round;
    }

    /// Current federation size, for comparing against how many
    /// future-round entries have already arrived.
    pub async fn federation_size(&self) -> usize {
        self.control.lock().await.federation.len()
    }

    /// Sources with an update already buffered for `round`, so a
    /// caller deciding whether to trigger a push can tell the
    /// propagator who it believes is already ahead.
    pub async fn future_entry_sources(&self, round: i32) -> Vec<NodeId> {
        self.future
            .lock()
            .await
            .get(&round)
            .map(|entries| entries.iter().map(|entry| entry.source).collect())
            .unwrap_or_default()
    }
}

async fn future_gc(future: &Mutex<BTreeMap<i32, Vec<FutureEntry>>>, current_round: i32) {
    let mut future = future.lock().await;
    future.retain(|round, _| *round >= current_round);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::fedavg::FedAvg;
    use crate::parameter_store::ParameterStore;

    fn node(addr: &str) -> NodeId {
        addr.parse().unwrap()
    }

    fn buffer(local: NodeId) -> AggregationBuffer {
        AggregationBuffer::new(local, Arc::new(FedAvg), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn completes_once_every_federation_member_has_reported() {
        let local = node("10.0.0.1:5000");
        let peer = node("10.0.0.2:5000");
        let buf = buffer(local);

        buf.update_federation_nodes([local, peer].into_iter().collect())
            .await;

        let first = buf
            .include_model_in_buffer(local, DenseParameters::new(vec![1.0]), 1.0, 0, true)
            .await
            .unwrap();
        assert!(!first);

        let second = buf
            .include_model_in_buffer(peer, DenseParameters::new(vec![3.0]), 1.0, 0, false)
            .await
            .unwrap();
        assert!(second);

        let result = buf.get_aggregation().await.unwrap();
        assert_eq!(result.as_slice(), &[2.0]);
    }

    #[tokio::test]
    async fn round_minus_one_updates_are_dropped() {
        let local = node("10.0.0.1:5000");
        let buf = buffer(local);
        buf.update_federation_nodes([local].into_iter().collect()).await;
        let included = buf
            .include_model_in_buffer(local, DenseParameters::new(vec![1.0]), 1.0, -1, true)
            .await
            .unwrap();
        assert!(!included);
    }

    #[tokio::test]
    async fn waiting_global_update_overwrites_the_buffer() {
        let local = node("10.0.0.1:5000");
        let peer = node("10.0.0.2:5000");
        let buf = buffer(local);
        buf.update_federation_nodes([local, peer].into_iter().collect())
            .await;
        buf.set_waiting_global_update().await;

        let applied = buf
            .include_model_in_buffer(peer, DenseParameters::new(vec![42.0]), 1.0, 5, false)
            .await
            .unwrap();
        assert!(applied);

        let result = buf.get_aggregation().await.unwrap();
        assert_eq!(result.as_slice(), &[42.0]);
    }

    #[tokio::test]
    async fn aggregation_times_out_when_nothing_arrives() {
        let local = node("10.0.0.1:5000");
        let peer = node("10.0.0.2:5000");
        let buf = buffer(local);
        buf.update_federation_nodes([local, peer].into_iter().collect())
            .await;
        let result = buf.get_aggregation().await;
        assert!(matches!(result, Err(AggregationError::Timeout(_))));
    }
}
