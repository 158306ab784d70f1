//! Typed publish/subscribe event bus used to decouple the round loop,
//! the role behaviors and the situational-awareness suggestion
//! machinery: a registration table keyed by event kind, so a new
//! subscriber only has to name which `NodeEvent` variants it cares
//! about rather than filtering a shared firehose.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tracing::trace;

use crate::node_id::NodeId;

/// Node-level lifecycle events published over the course of a round.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    RoundStart { round: i32, federation_size: usize },
    RoundEnd { round: i32 },
    AggregationDone { round: i32 },
    ExperimentFinish,
    NodeFound { peer: NodeId },
    UpdateNeighbor { peer: NodeId, removed: bool },
}

impl NodeEvent {
    fn key(&self) -> &'static str {
        match self {
            NodeEvent::RoundStart { .. } => "round_start",
            NodeEvent::RoundEnd { .. } => "round_end",
            NodeEvent::AggregationDone { .. } => "aggregation_done",
            NodeEvent::ExperimentFinish => "experiment_finish",
            NodeEvent::NodeFound { .. } => "node_found",
            NodeEvent::UpdateNeighbor { .. } => "update_neighbor",
        }
    }
}

/// Whether a subscriber's handler runs inline, one at a time, ahead of
/// everything else subscribed to the same event (`Serialized`), or
/// alongside every other `Concurrent` subscriber (`Concurrent`).
/// Ordering-sensitive subscribers (the aggregation buffer reacting to
/// `RoundEnd` before the propagator does) register serialized; the
/// rest register concurrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Serialized,
    Concurrent,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &NodeEvent);
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(&NodeEvent) + Send + Sync,
{
    async fn handle(&self, event: &NodeEvent) {
        (self)(event)
    }
}

struct Subscription {
    mode: DispatchMode,
    handler: Arc<dyn EventHandler>,
}

/// The bus itself. One instance is shared (via `Arc`) across the
/// round loop, the propagator, the arbiter and every role behavior.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<&'static str, Vec<Subscription>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
        })
    }

    pub async fn subscribe(&self, key: NodeEventKind, mode: DispatchMode, handler: Arc<dyn EventHandler>) {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(key.as_key())
            .or_insert_with(Vec::new)
            .push(Subscription { mode, handler });
    }

    /// Publishes an event: every `Serialized` subscriber for this
    /// event kind runs in registration order first, then every
    /// `Concurrent` subscriber runs together. Returns once all
    /// handlers have completed.
    pub async fn publish(&self, event: NodeEvent) {
        trace!(kind = event.key(), "publishing event");
        let subscribers = self.subscribers.read().await;
        let Some(subs) = subscribers.get(event.key()) else {
            return;
        };

        for sub in subs.iter().filter(|s| s.mode == DispatchMode::Serialized) {
            sub.handler.handle(&event).await;
        }

        let concurrent: Vec<_> = subs
            .iter()
            .filter(|s| s.mode == DispatchMode::Concurrent)
            .map(|s| {
                let handler = s.handler.clone();
                let event = event.clone();
                async move { handler.handle(&event).await }
            })
            .collect();
        futures::future::join_all(concurrent).await;
    }
}

/// Discriminant-only key used to subscribe before an event's payload
/// exists. Mirrors `std::mem::discriminant` but stable across crate
/// versions since it's spelled out explicitly rather than derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    RoundStart,
    RoundEnd,
    AggregationDone,
    ExperimentFinish,
    NodeFound,
    UpdateNeighbor,
}

impl NodeEventKind {
    fn as_key(self) -> &'static str {
        match self {
            NodeEventKind::RoundStart => "round_start",
            NodeEventKind::RoundEnd => "round_end",
            NodeEventKind::AggregationDone => "aggregation_done",
            NodeEventKind::ExperimentFinish => "experiment_finish",
            NodeEventKind::NodeFound => "node_found",
            NodeEventKind::UpdateNeighbor => "update_neighbor",
        }
    }
}

/// Barrier used by the situational-awareness suggestion protocol: a
/// round end fans out to every subscriber that may want to suggest a
/// topology change (maintain/search/reconnect/adjust-weight), and the
/// arbiter waits for all of them to report in before acting on any
/// suggestion.
pub struct SuggestionBarrier {
    expected: AtomicUsize,
    arrived: AtomicUsize,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl SuggestionBarrier {
    pub fn new(expected: usize) -> Self {
        let (done_tx, done_rx) = watch::channel(expected == 0);
        Self {
            expected: AtomicUsize::new(expected),
            arrived: AtomicUsize::new(0),
            done_tx,
            done_rx,
        }
    }

    /// Resets the barrier for a new round with a possibly different
    /// number of expected contributors (awareness components can be
    /// added or removed between rounds).
    pub fn reset(&self, expected: usize) {
        self.expected.store(expected, Ordering::Release);
        self.arrived.store(0, Ordering::Release);
        let _ = self.done_tx.send(expected == 0);
    }

    /// Called once per round by each awareness component once it has
    /// either registered a suggestion or decided not to. Returns
    /// `true` if this call completed the barrier.
    pub fn notify_all_suggestions_done(&self) -> bool {
        let arrived = self.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        let expected = self.expected.load(Ordering::Acquire);
        if arrived >= expected {
            let _ = self.done_tx.send(true);
            true
        } else {
            false
        }
    }

    pub async fn wait(&self) {
        let mut rx = self.done_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Counter(Arc<AtomicU32>);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: &NodeEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn publish_reaches_both_serialized_and_concurrent_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU32::new(0));

        bus.subscribe(
            NodeEventKind::RoundEnd,
            DispatchMode::Serialized,
            Arc::new(Counter(count.clone())),
        )
        .await;
        bus.subscribe(
            NodeEventKind::RoundEnd,
            DispatchMode::Concurrent,
            Arc::new(Counter(count.clone())),
        )
        .await;

        bus.publish(NodeEvent::RoundEnd { round: 1 }).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn suggestion_barrier_completes_after_expected_arrivals() {
        let barrier = SuggestionBarrier::new(2);
        assert!(!barrier.notify_all_suggestions_done());
        assert!(barrier.notify_all_suggestions_done());
        barrier.wait().await;
    }

    #[tokio::test]
    async fn suggestion_barrier_with_zero_expected_is_immediately_done() {
        let barrier = SuggestionBarrier::new(0);
        barrier.wait().await;
    }
}
