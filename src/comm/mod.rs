//! Communications Manager: the connection table, the dedup ring, and
//! the dial/send/broadcast/forward operations built on top of it.
//!
//! Peers are tracked in a `DashMap` keyed by `NodeId` rather than
//! behind a single lock, so concurrent readers (the round loop, the
//! propagator, role behaviors) don't serialize on every lookup; the
//! connection values are the reader/writer-task handles from
//! `connection`.

mod dedup;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::connection::{perform_handshake, Connection, ConnectionError, HandshakeOutcome};
use crate::message::{Digest, Message};
use crate::netsim::NetworkSim;
use crate::node_id::NodeId;

pub use dedup::DedupRing;

/// Default capacity of the global forwarded-message dedup ring.
pub const DEFAULT_DEDUP_CAPACITY: usize = 100_000;

#[derive(Debug, Error)]
pub enum CommError {
    #[error("{0} is blacklisted")]
    Blacklisted(NodeId),

    #[error("refusing to dial self ({0})")]
    SelfDial(NodeId),

    #[error("connection table capacity exceeded")]
    CapacityExceeded,

    #[error("no active connection to {0}")]
    NotConnected(NodeId),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Upper bound on simultaneously tracked connections. Past this,
/// new outbound dials are refused until the set shrinks.
pub const DEFAULT_MAX_CONNECTIONS: usize = 128;

/// The inbound side of the manager: every message accepted from a
/// peer, tagged with who sent it.
pub type Inbox = mpsc::Receiver<(NodeId, Message)>;

/// Connection table, dedup ring and dial bookkeeping shared by the
/// round loop, the propagator and the role behaviors. Cloned as an
/// `Arc` internally by callers; cheap to clone since every field is
/// itself shared.
pub struct Comm {
    local: NodeId,
    connections: DashMap<NodeId, Connection>,
    pending_dials: DashMap<NodeId, ()>,
    blacklist: RwLock<HashSet<NodeId>>,
    dedup: DedupRing,
    inbound_tx: mpsc::Sender<(NodeId, Message)>,
    closed_tx: mpsc::Sender<NodeId>,
    max_connections: usize,
    sim: Option<Arc<NetworkSim>>,
}

impl Comm {
    /// Creates a manager and returns it alongside the inbox channel
    /// callers should drain in the round loop, and the channel that
    /// reports connections as their reader/writer tasks exit.
    pub fn new(local: NodeId) -> (Arc<Self>, Inbox, mpsc::Receiver<NodeId>) {
        Self::with_capacity(local, DEFAULT_DEDUP_CAPACITY, DEFAULT_MAX_CONNECTIONS)
    }

    pub fn with_capacity(
        local: NodeId,
        dedup_capacity: usize,
        max_connections: usize,
    ) -> (Arc<Self>, Inbox, mpsc::Receiver<NodeId>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        let (closed_tx, closed_rx) = mpsc::channel(128);

        let comm = Arc::new(Self {
            local,
            connections: DashMap::new(),
            pending_dials: DashMap::new(),
            blacklist: RwLock::new(HashSet::new()),
            dedup: DedupRing::new(dedup_capacity),
            inbound_tx,
            closed_tx,
            max_connections,
            sim: None,
        });

        (comm, inbound_rx, closed_rx)
    }

    /// Installs a network-simulation shaping profile applied to every
    /// connection's writer side from this point on. Existing connections are unaffected; call this
    /// before `listen`/`connect` are used to dial peers.
    pub fn with_network_sim(self: Arc<Self>, sim: Arc<NetworkSim>) -> Arc<Self> {
        let mut this = match Arc::try_unwrap(self) {
            Ok(this) => this,
            Err(arc) => return arc,
        };
        this.sim = Some(sim);
        Arc::new(this)
    }

    pub fn local_id(&self) -> NodeId {
        self.local
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_connected(&self, peer: &NodeId) -> bool {
        self.connections
            .get(peer)
            .map(|c| c.is_active())
            .unwrap_or(false)
    }

    pub async fn is_blacklisted(&self, peer: &NodeId) -> bool {
        self.blacklist.read().await.contains(peer)
    }

    pub async fn blacklist(&self, peer: NodeId) {
        self.blacklist.write().await.insert(peer);
        self.disconnect(&peer);
    }

    /// Starts listening for inbound dials on `addr`, handing each
    /// accepted socket through the same handshake/collision path a
    /// manual `connect` would use.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> Result<(), CommError> {
        let listener = TcpListener::bind(addr).await?;
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, remote_addr)) => {
                        let this = this.clone();
                        tokio::spawn(async move {
                            if let Err(error) = this.accept(socket, remote_addr).await {
                                warn!(%remote_addr, %error, "inbound handshake failed");
                            }
                        });
                    }
                    Err(error) => {
                        warn!(%error, "accept failed");
                    }
                }
            }
        });
        Ok(())
    }

    async fn accept(
        self: &Arc<Self>,
        mut socket: TcpStream,
        remote_addr: SocketAddr,
    ) -> Result<(), CommError> {
        let existing = self.peer_at(remote_addr);
        // The accepting side doesn't originate a directness request of
        // its own; it just mirrors whatever the dialer declared.
        let (peer, remote_direct, outcome) = perform_handshake(&mut socket, self.local, true, existing).await?;

        if self.blacklist.read().await.contains(&peer) {
            return Err(CommError::Blacklisted(peer));
        }

        match outcome {
            HandshakeOutcome::Accepted => {
                self.install(peer, remote_addr, remote_direct, socket);
                Ok(())
            }
            HandshakeOutcome::YieldToPeer => {
                debug!(%peer, "yielding incoming connection to existing outgoing one");
                Ok(())
            }
        }
    }

    fn peer_at(&self, addr: SocketAddr) -> Option<NodeId> {
        self.connections
            .iter()
            .find(|entry| entry.remote_addr == addr)
            .map(|entry| *entry.key())
    }

    /// Dials a peer if not already connected at equal-or-higher
    /// directness. Idempotent: a concurrent dial to the same peer is a
    /// no-op, not an error. An indirect acquaintance that's asked for
    /// again with `direct = true` is upgraded by redialing, so it
    /// counts as a federation/propagation neighbor from then on.
    pub async fn connect(self: &Arc<Self>, peer: NodeId, direct: bool) -> Result<(), CommError> {
        if peer == self.local {
            return Err(CommError::SelfDial(peer));
        }
        if self.blacklist.read().await.contains(&peer) {
            return Err(CommError::Blacklisted(peer));
        }
        if let Some(entry) = self.connections.get(&peer) {
            if entry.is_active() && (entry.direct || !direct) {
                return Ok(());
            }
        }
        if self.connections.len() >= self.max_connections && !self.connections.contains_key(&peer) {
            return Err(CommError::CapacityExceeded);
        }
        if self.pending_dials.insert(peer, ()).is_some() {
            return Ok(());
        }

        let result = self.dial(peer, direct).await;
        self.pending_dials.remove(&peer);
        result
    }

    async fn dial(self: &Arc<Self>, peer: NodeId, direct: bool) -> Result<(), CommError> {
        let mut socket = TcpStream::connect(peer.addr()).await?;
        let existing = Some(peer).filter(|p| self.is_connected(p));
        let (resolved_peer, _remote_direct, outcome) =
            perform_handshake(&mut socket, self.local, direct, existing).await?;

        match outcome {
            HandshakeOutcome::Accepted => {
                self.install(resolved_peer, peer.addr(), direct, socket);
                Ok(())
            }
            HandshakeOutcome::YieldToPeer => {
                debug!(%resolved_peer, "yielding outgoing dial to peer's incoming connection");
                Ok(())
            }
        }
    }

    fn install(self: &Arc<Self>, peer: NodeId, remote_addr: SocketAddr, direct: bool, socket: TcpStream) {
        if let Some((_, old)) = self.connections.remove(&peer) {
            old.close();
        }
        let connection = Connection::spawn_with_sim(
            peer,
            remote_addr,
            direct,
            socket,
            self.inbound_tx.clone(),
            self.closed_tx.clone(),
            self.sim.clone(),
        );
        info!(%peer, direct, "connection established");
        self.connections.insert(peer, connection);
    }

    pub fn disconnect(&self, peer: &NodeId) {
        if let Some((_, connection)) = self.connections.remove(peer) {
            connection.close();
        }
    }

    /// Drops the bookkeeping for a connection whose reader/writer
    /// tasks have already exited (reported via the `closed` channel).
    pub fn reap(&self, peer: &NodeId) {
        if let Some(entry) = self.connections.get(peer) {
            if !entry.is_active() {
                drop(entry);
                self.connections.remove(peer);
            }
        }
    }

    /// Direct neighbors only — this is what backs the federation set
    /// and propagation recipients. An indirect acquaintance (known
    /// about but not dialed as a neighbor) never counts as one.
    pub fn peers(&self) -> Vec<NodeId> {
        self.connections.iter().filter(|e| e.direct).map(|e| *e.key()).collect()
    }

    /// Every tracked connection regardless of directness, for
    /// diagnostics (the crash dump snapshot) where an indirect
    /// acquaintance is still worth recording.
    pub fn all_peers(&self) -> Vec<NodeId> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    pub fn send_to(&self, peer: &NodeId, message: Message) -> Result<(), CommError> {
        let connection = self
            .connections
            .get(peer)
            .ok_or(CommError::NotConnected(*peer))?;
        connection.try_send(message).map_err(CommError::from)
    }

    /// Sends to every currently active direct neighbor, logging but
    /// not failing on individual unreachable peers.
    pub fn broadcast(&self, message: Message) {
        for entry in self.connections.iter() {
            if entry.is_active() && entry.direct {
                if let Err(error) = entry.try_send(message.clone()) {
                    debug!(peer = %entry.key(), %error, "broadcast to peer failed");
                }
            }
        }
    }

    /// First-hop admission for a freshly received message, run once
    /// per inbound frame ahead of any other processing: records its
    /// digest and, on first sighting, re-broadcasts it to every direct
    /// neighbor except the one it arrived from if the category is
    /// flood-eligible. Returns `false` for a message whose digest has
    /// already been observed, so the caller drops it without
    /// dispatching a `MessageEvent` or forwarding it again.
    pub fn admit_and_forward(&self, from: NodeId, message: &Message) -> bool {
        if !self.dedup.observe(Digest::of(message)) {
            return false;
        }
        if !message.category().is_flood_eligible() {
            return true;
        }
        for entry in self.connections.iter() {
            if *entry.key() == from || !entry.is_active() || !entry.direct {
                continue;
            }
            if let Err(error) = entry.try_send(message.clone()) {
                debug!(peer = %entry.key(), %error, "forward to peer failed");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;

    use super::*;

    fn node(addr: &str) -> NodeId {
        addr.parse().unwrap()
    }

    #[tokio::test]
    async fn self_dial_is_rejected() {
        let local = node("127.0.0.1:9000");
        let (comm, _inbox, _closed) = Comm::new(local);
        let err = comm.connect(local, true).await.unwrap_err();
        assert!(matches!(err, CommError::SelfDial(_)));
    }

    #[tokio::test]
    async fn blacklisted_peer_is_rejected() {
        let local = node("127.0.0.1:9000");
        let peer = node("127.0.0.1:9001");
        let (comm, _inbox, _closed) = Comm::new(local);
        comm.blacklist(peer).await;
        let err = comm.connect(peer, true).await.unwrap_err();
        assert!(matches!(err, CommError::Blacklisted(_)));
    }

    #[tokio::test]
    async fn connect_upgrades_an_indirect_connection_to_direct() {
        let ephemeral = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = ephemeral.local_addr().unwrap();
        drop(ephemeral);

        let peer = NodeId::new(peer_addr);
        let (comm_b, _inbox_b, _closed_b) = Comm::new(peer);
        comm_b.listen(peer_addr).await.unwrap();

        let local = node("127.0.0.1:9200");
        let (comm_a, _inbox_a, _closed_a) = Comm::new(local);

        comm_a.connect(peer, false).await.unwrap();
        time::sleep(Duration::from_millis(50)).await;
        assert!(comm_a.peers().is_empty());
        assert_eq!(comm_a.all_peers(), vec![peer]);

        comm_a.connect(peer, true).await.unwrap();
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(comm_a.peers(), vec![peer]);
    }

    #[tokio::test]
    async fn a_duplicate_message_is_admitted_exactly_once() {
        use crate::message::{Action, DiscoveryAction, Message};

        let local = node("127.0.0.1:9000");
        let from = node("127.0.0.1:9001");
        let (comm, _inbox, _closed) = Comm::new(local);
        let message = Message::new(from, Action::Discovery(DiscoveryAction::Register));

        assert!(comm.admit_and_forward(from, &message));
        assert!(!comm.admit_and_forward(from, &message));
    }
}
