//! Handshake and the duplicate-connection collision rule:
//! when two nodes dial each other simultaneously, the side with the
//! lexicographically smaller IP address keeps its outgoing connection
//! and the other side drops its own in favor of the incoming one.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::node_id::NodeId;

use super::ConnectionError;

/// Result of a handshake attempt from the local node's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Handshake succeeded, this side keeps the connection.
    Accepted,
    /// A collision was detected and the local side lost; the caller
    /// should drop this socket and rely on the peer's incoming dial.
    YieldToPeer,
}

/// Exchanges `NodeId`s and each side's declared "direct" intention
/// over a freshly-connected socket, and resolves any simultaneous-dial
/// collision. `existing_peer` is `Some` when we already hold an active
/// connection to this address (the collision case); `None` for a
/// first-time dial. Returns the peer's id, the peer's declared direct
/// flag, and the collision outcome.
pub async fn perform_handshake(
    socket: &mut TcpStream,
    local: NodeId,
    local_direct: bool,
    existing_peer: Option<NodeId>,
) -> Result<(NodeId, bool, HandshakeOutcome), ConnectionError> {
    write_handshake(socket, local, local_direct).await?;
    let (remote, remote_direct) = read_handshake(socket).await?;

    let outcome = match existing_peer {
        Some(existing) if existing == remote => {
            if local.has_lexicographically_smaller_ip(&remote) {
                debug!(%remote, "collision resolved: keeping local outgoing connection");
                HandshakeOutcome::Accepted
            } else {
                debug!(%remote, "collision resolved: yielding to peer's incoming connection");
                HandshakeOutcome::YieldToPeer
            }
        }
        _ => HandshakeOutcome::Accepted,
    };

    Ok((remote, remote_direct, outcome))
}

async fn write_handshake(socket: &mut TcpStream, id: NodeId, direct: bool) -> Result<(), ConnectionError> {
    let encoded = id.to_string();
    let bytes = encoded.as_bytes();
    let mut buf = BytesMut::with_capacity(3 + bytes.len());
    buf.put_u16(bytes.len() as u16);
    buf.put_u8(direct as u8);
    buf.extend_from_slice(bytes);
    socket.write_all(&buf).await?;
    Ok(())
}

async fn read_handshake(socket: &mut TcpStream) -> Result<(NodeId, bool), ConnectionError> {
    let mut len_buf = [0u8; 2];
    socket.read_exact(&mut len_buf).await?;
    let len = (&len_buf[..]).get_u16() as usize;
    let mut direct_buf = [0u8; 1];
    socket.read_exact(&mut direct_buf).await?;
    let direct = direct_buf[0] != 0;
    let mut body = vec![0u8; len];
    socket.read_exact(&mut body).await?;
    let text = String::from_utf8_lossy(&body);
    let id = text.parse().map_err(|_| {
        ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed node id in handshake",
        ))
    })?;
    Ok((id, direct))
}
