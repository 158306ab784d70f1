//! Optional UDP multicast bootstrap discovery: nodes that
//! don't yet know any peers can announce themselves and listen for
//! others on a well-known multicast group, independently of the
//! overlay's own `discovery`/`discover` wire messages which require an
//! existing TCP connection.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::node_id::NodeId;

/// Multicast group and port the discovery beacon listens/announces on.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const MULTICAST_PORT: u16 = 1900;
const SERVICE_URN: &str = "urn:nebula-service";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A parsed discovery datagram: either a bare search (`discover`) or a
/// beacon announcing a node's identity and (optionally) its location.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryMessage {
    Discover,
    Beacon {
        node: NodeId,
        lat: Option<f64>,
        lon: Option<f64>,
    },
}

impl DiscoveryMessage {
    fn encode(&self) -> String {
        match self {
            DiscoveryMessage::Discover => format!("ST: {}\r\nTYPE: discover\r\n", SERVICE_URN),
            DiscoveryMessage::Beacon { node, lat, lon } => {
                let mut body = format!(
                    "ST: {}\r\nTYPE: beacon\r\nLOCATION: {}\r\n",
                    SERVICE_URN, node
                );
                if let Some(lat) = lat {
                    body.push_str(&format!("LATITUDE: {}\r\n", lat));
                }
                if let Some(lon) = lon {
                    body.push_str(&format!("LONGITUDE: {}\r\n", lon));
                }
                body
            }
        }
    }

    fn decode(payload: &str) -> Option<Self> {
        let mut urn_matches = false;
        let mut kind: Option<&str> = None;
        let mut location: Option<&str> = None;
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;

        for line in payload.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "ST" => urn_matches = value == SERVICE_URN,
                "TYPE" => kind = Some(value),
                "LOCATION" => location = Some(value),
                "LATITUDE" => lat = value.parse().ok(),
                "LONGITUDE" => lon = value.parse().ok(),
                _ => {}
            }
        }

        if !urn_matches {
            return None;
        }

        match kind? {
            "discover" => Some(DiscoveryMessage::Discover),
            "beacon" => Some(DiscoveryMessage::Beacon {
                node: location?.parse().ok()?,
                lat,
                lon,
            }),
            _ => None,
        }
    }
}

/// A bound multicast socket used both to announce this node and to
/// listen for others' announcements.
pub struct DiscoverySocket {
    socket: UdpSocket,
}

impl DiscoverySocket {
    pub async fn bind() -> Result<Self, DiscoveryError> {
        let socket = UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            MULTICAST_PORT,
        )))
        .await?;
        socket.join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED)?;
        Ok(Self { socket })
    }

    pub async fn send(&self, message: &DiscoveryMessage) -> Result<(), DiscoveryError> {
        let payload = message.encode();
        let target = SocketAddr::V4(SocketAddrV4::new(MULTICAST_GROUP, MULTICAST_PORT));
        self.socket.send_to(payload.as_bytes(), target).await?;
        Ok(())
    }

    /// Waits for the next valid discovery datagram, skipping anything
    /// malformed or addressed to an unrelated service.
    pub async fn recv(&self) -> Result<DiscoveryMessage, DiscoveryError> {
        let mut buf = [0u8; 1024];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            let text = String::from_utf8_lossy(&buf[..len]);
            match DiscoveryMessage::decode(&text) {
                Some(message) => return Ok(message),
                None => debug!(%from, "ignoring malformed or foreign discovery datagram"),
            }
        }
    }
}

pub async fn announce_beacon(
    socket: &DiscoverySocket,
    node: NodeId,
    lat: Option<f64>,
    lon: Option<f64>,
) {
    if let Err(error) = socket.send(&DiscoveryMessage::Beacon { node, lat, lon }).await {
        warn!(%error, "failed to send discovery beacon");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_beacon() {
        let node: NodeId = "10.0.0.1:5000".parse().unwrap();
        let message = DiscoveryMessage::Beacon {
            node,
            lat: Some(45.5),
            lon: Some(-122.6),
        };
        let encoded = message.encode();
        let decoded = DiscoveryMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trips_a_discover() {
        let encoded = DiscoveryMessage::Discover.encode();
        assert_eq!(DiscoveryMessage::decode(&encoded), Some(DiscoveryMessage::Discover));
    }

    #[test]
    fn rejects_foreign_service_urn() {
        let payload = "ST: urn:something-else\r\nTYPE: discover\r\n";
        assert_eq!(DiscoveryMessage::decode(payload), None);
    }
}
