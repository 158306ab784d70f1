//! Per-peer connection: a pair of reader/writer tasks over one TCP
//! stream, a bounded outbound queue, and the small state machine that
//! tracks handshake progress and liveness.
//!
//! The transport is a plain `TcpStream` split into independent reader
//! and writer halves, each owned by its own task, so a slow peer's
//! write queue backing up can't stall reads from every other peer.

mod handshake;
mod heartbeat;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::message::{CodecError, FrameCodec, Message};
use crate::netsim::NetworkSim;
use crate::node_id::NodeId;

pub use handshake::{perform_handshake, HandshakeOutcome};

/// Default number of consecutive missed heartbeats before a peer is
/// considered dead.
pub const DEFAULT_MISSED_HEARTBEAT_LIMIT: u32 = 3;

/// Capacity of a single connection's outbound queue. A peer that
/// can't keep up backs up its own queue, not anyone else's.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Maximum consecutive malformed frames tolerated on one connection
/// before it is closed.
pub const MALFORMED_FRAME_LIMIT: u32 = 3;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("handshake rejected by peer {0}")]
    HandshakeRejected(NodeId),

    #[error("outbound queue to {0} is full")]
    QueueFull(NodeId),

    #[error("connection to {0} is closed")]
    Closed(NodeId),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lifecycle state of a connection, stored as an atomic so reader,
/// writer and heartbeat tasks can observe transitions without taking
/// a lock for the common case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Pending = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Pending,
            1 => ConnectionState::Active,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Geographic position attached to a connection by an optional
/// `Control::Mobility` message. Read-only from the perspective of
/// everything except the handler that applies the update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPosition {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            Some(Self { lat, lon })
        } else {
            None
        }
    }
}

/// A live connection to one peer. Cloneable handle; the reader and
/// writer tasks themselves own the socket halves.
pub struct Connection {
    pub peer: NodeId,
    pub remote_addr: SocketAddr,
    pub direct: bool,
    state: Arc<AtomicU8>,
    missed_heartbeats: Arc<AtomicU32>,
    geo: Arc<parking_lot_geo::GeoCell>,
    outbound: mpsc::Sender<Message>,
    reader_task: Arc<JoinHandle<()>>,
    writer_task: Arc<JoinHandle<()>>,
    heartbeat_task: Arc<JoinHandle<()>>,
}

impl Connection {
    /// Spawns the reader and writer tasks over an already-handshaken
    /// socket and returns a handle plus the channel the reader feeds
    /// inbound messages into.
    pub fn spawn(
        peer: NodeId,
        remote_addr: SocketAddr,
        direct: bool,
        socket: TcpStream,
        inbound: mpsc::Sender<(NodeId, Message)>,
        on_closed: mpsc::Sender<NodeId>,
    ) -> Self {
        Self::spawn_with_sim(peer, remote_addr, direct, socket, inbound, on_closed, None)
    }

    /// Same as `spawn`, but runs the writer task's frames through an
    /// optional shaping profile before they hit the socket.
    pub fn spawn_with_sim(
        peer: NodeId,
        remote_addr: SocketAddr,
        direct: bool,
        socket: TcpStream,
        inbound: mpsc::Sender<(NodeId, Message)>,
        on_closed: mpsc::Sender<NodeId>,
        sim: Option<Arc<NetworkSim>>,
    ) -> Self {
        let framed = Framed::new(socket, FrameCodec::new());
        let (writer_half, mut reader_half) = framed.split();

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let state = Arc::new(AtomicU8::new(ConnectionState::Active as u8));
        let missed_heartbeats = Arc::new(AtomicU32::new(0));
        let geo = Arc::new(parking_lot_geo::GeoCell::new());

        let writer_task = {
            let state = state.clone();
            let peer = peer;
            tokio::spawn(async move {
                run_writer(peer, writer_half, outbound_rx, state, sim).await;
            })
        };

        let reader_task = {
            let state = state.clone();
            let missed = missed_heartbeats.clone();
            let geo = geo.clone();
            let peer = peer;
            let on_closed = on_closed.clone();
            tokio::spawn(async move {
                run_reader(peer, &mut reader_half, inbound, state, missed, geo).await;
                let _ = on_closed.send(peer).await;
            })
        };

        let heartbeat_task = {
            let outbound_tx = outbound_tx.clone();
            let state = state.clone();
            let missed = missed_heartbeats.clone();
            tokio::spawn(async move {
                heartbeat::run(peer, outbound_tx, state, missed).await;
            })
        };

        Self {
            peer,
            remote_addr,
            direct,
            state,
            missed_heartbeats,
            geo,
            outbound: outbound_tx,
            reader_task: Arc::new(reader_task),
            writer_task: Arc::new(writer_task),
            heartbeat_task: Arc::new(heartbeat_task),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    pub fn geo(&self) -> Option<GeoPosition> {
        self.geo.get()
    }

    pub fn update_geolocation(&self, lat: f64, lon: f64) -> bool {
        match GeoPosition::new(lat, lon) {
            Some(pos) => {
                self.geo.set(pos);
                true
            }
            None => false,
        }
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.missed_heartbeats.load(Ordering::Acquire)
    }

    /// Enqueues a message for the writer task. Fails fast rather than
    /// blocking the caller if the peer's queue is backed up.
    pub fn try_send(&self, message: Message) -> Result<(), ConnectionError> {
        self.outbound
            .try_send(message)
            .map_err(|_| ConnectionError::QueueFull(self.peer))
    }

    pub fn begin_closing(&self) {
        self.state
            .store(ConnectionState::Closing as u8, Ordering::Release);
    }

    pub fn close(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.reader_task.abort();
        self.writer_task.abort();
        self.heartbeat_task.abort();
    }
}

type FramedWriter = futures::stream::SplitSink<Framed<TcpStream, FrameCodec>, Message>;
type FramedReader = futures::stream::SplitStream<Framed<TcpStream, FrameCodec>>;

async fn run_writer(
    peer: NodeId,
    mut writer: FramedWriter,
    mut outbound_rx: mpsc::Receiver<Message>,
    state: Arc<AtomicU8>,
    sim: Option<Arc<NetworkSim>>,
) {
    while let Some(message) = outbound_rx.recv().await {
        if ConnectionState::from_u8(state.load(Ordering::Acquire)) == ConnectionState::Closed {
            break;
        }

        if let Some(sim) = &sim {
            if sim.should_drop() {
                debug!(%peer, "network-sim dropped an outbound frame");
                continue;
            }
            let wait = sim.rate_limit_wait(message.params.as_ref().map_or(0, |p| p.len()));
            let delay = sim.extra_latency() + wait;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if let Err(error) = writer.send(message).await {
            warn!(%peer, %error, "write failed, closing connection");
            break;
        }
    }
    state.store(ConnectionState::Closed as u8, Ordering::Release);
}

async fn run_reader(
    peer: NodeId,
    reader: &mut FramedReader,
    inbound: mpsc::Sender<(NodeId, Message)>,
    state: Arc<AtomicU8>,
    missed_heartbeats: Arc<AtomicU32>,
    geo: Arc<parking_lot_geo::GeoCell>,
) {
    let mut malformed_streak = 0u32;

    while let Some(frame) = reader.next().await {
        match frame {
            Ok(message) => {
                malformed_streak = 0;
                missed_heartbeats.store(0, Ordering::Release);
                if let (Some(lat), Some(lon)) = (message.lat, message.lon) {
                    if let Some(pos) = GeoPosition::new(lat, lon) {
                        geo.set(pos);
                    }
                }
                if inbound.send((peer, message)).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                malformed_streak += 1;
                debug!(%peer, %error, malformed_streak, "malformed frame");
                if malformed_streak >= MALFORMED_FRAME_LIMIT {
                    warn!(%peer, "closing connection after repeated malformed frames");
                    break;
                }
            }
        }
    }
    state.store(ConnectionState::Closed as u8, Ordering::Release);
}

/// A tiny lock-protected cell for the mutable geolocation field. Kept
/// as its own module so `Connection`'s public surface doesn't leak a
/// lock guard type.
mod parking_lot_geo {
    use std::sync::RwLock;

    use super::GeoPosition;

    pub struct GeoCell(RwLock<Option<GeoPosition>>);

    impl GeoCell {
        pub fn new() -> Self {
            Self(RwLock::new(None))
        }

        pub fn get(&self) -> Option<GeoPosition> {
            *self.0.read().expect("geo lock poisoned")
        }

        pub fn set(&self, pos: GeoPosition) {
            *self.0.write().expect("geo lock poisoned") = Some(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_position_rejects_out_of_range_values() {
        assert!(GeoPosition::new(91.0, 0.0).is_none());
        assert!(GeoPosition::new(0.0, 181.0).is_none());
        assert!(GeoPosition::new(45.0, -122.0).is_some());
    }
}
