//! Content digest used for forwarder-stable deduplication.

use std::fmt;

use tiny_keccak::{Hasher, Sha3};

use super::envelope::Message;

/// SHA3-256 digest of a message's inner payload (everything but the
/// outer `source` field). Two nodes forwarding the same logical
/// message produce the same digest even though each wraps it with its
/// own `source`, which is what lets the Communications Manager's dedup
/// ring work across hops rather than only suppressing exact resends.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn of(message: &Message) -> Self {
        let payload = message.digestable_payload();
        let mut hasher = Sha3::v256();
        let mut out = [0u8; 32];
        hasher.update(&payload);
        hasher.finalize(&mut out);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::envelope::{Action, DiscoveryAction};
    use crate::node_id::NodeId;

    fn node(addr: &str) -> NodeId {
        addr.parse().unwrap()
    }

    #[test]
    fn same_payload_different_source_same_digest() {
        let a = Message::new(node("10.0.0.1:5000"), Action::Discovery(DiscoveryAction::Register))
            .with_round(3);
        let b = Message::new(node("10.0.0.2:5000"), Action::Discovery(DiscoveryAction::Register))
            .with_round(3);
        assert_eq!(Digest::of(&a), Digest::of(&b));
    }

    #[test]
    fn different_payload_different_digest() {
        let a = Message::new(node("10.0.0.1:5000"), Action::Discovery(DiscoveryAction::Register))
            .with_round(3);
        let b = Message::new(node("10.0.0.1:5000"), Action::Discovery(DiscoveryAction::Register))
            .with_round(4);
        assert_ne!(Digest::of(&a), Digest::of(&b));
    }
}
