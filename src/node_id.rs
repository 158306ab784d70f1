//! `NodeID`: the `<ip>:<port>` identity used throughout the crate.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Globally unique (within one experiment) identifier for a node,
/// written as `<ip>:<port>`. Kept as a thin wrapper over `SocketAddr`
/// rather than a bare `String` so parsing happens once, at the
/// boundary, and comparisons/hashing are cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(SocketAddr);

impl NodeId {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }

    pub fn ip(&self) -> std::net::IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    /// Deterministic collision-resolution ordering used during
    /// handshake: the side with the lexicographically smaller IP
    /// address wins (keeps its outgoing connection). Compares the IP's
    /// textual representation, not its numeric value.
    pub fn has_lexicographically_smaller_ip(&self, other: &NodeId) -> bool {
        self.ip().to_string() < other.ip().to_string()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<SocketAddr> for NodeId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_port() {
        let id: NodeId = "10.0.0.2:5000".parse().unwrap();
        assert_eq!(id.port(), 5000);
        assert_eq!(id.to_string(), "10.0.0.2:5000");
    }

    #[test]
    fn collision_resolution_orders_by_ip_text() {
        let a: NodeId = "10.0.0.2:5000".parse().unwrap();
        let b: NodeId = "10.0.0.5:5000".parse().unwrap();
        assert!(a.has_lexicographically_smaller_ip(&b));
        assert!(!b.has_lexicographically_smaller_ip(&a));
    }
}
