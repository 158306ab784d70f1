//! Liveness: a periodic `Control::Alive` message out, and a counter
//! of missed beats in, the connection is pruned by `comm` once the
//! counter passes `DEFAULT_MISSED_HEARTBEAT_LIMIT`.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use crate::message::{Action, ControlAction, Message};
use crate::node_id::NodeId;

use super::ConnectionState;

/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

pub(super) async fn run(
    peer: NodeId,
    outbound: mpsc::Sender<Message>,
    state: Arc<AtomicU8>,
    missed_heartbeats: Arc<AtomicU32>,
) {
    run_with_period(
        peer,
        outbound,
        state,
        missed_heartbeats,
        DEFAULT_HEARTBEAT_PERIOD,
        super::DEFAULT_MISSED_HEARTBEAT_LIMIT,
    )
    .await
}

async fn run_with_period(
    peer: NodeId,
    outbound: mpsc::Sender<Message>,
    state: Arc<AtomicU8>,
    missed_heartbeats: Arc<AtomicU32>,
    period: Duration,
    missed_limit: u32,
) {
    let mut ticker = time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if ConnectionState::from_u8(state.load(Ordering::Acquire)) == ConnectionState::Closed {
            return;
        }

        let beat = Message::new(peer, Action::Control(ControlAction::Alive));
        if outbound.send(beat).await.is_err() {
            return;
        }

        let missed = missed_heartbeats.fetch_add(1, Ordering::AcqRel) + 1;
        if missed >= missed_limit {
            state.store(ConnectionState::Closed as u8, Ordering::Release);
            return;
        }
    }
}
