//! Bounded FIFO ring of recently seen message digests, used to drop
//! messages this node (or another forwarder) has already relayed.

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashSet;

use crate::message::Digest;

pub struct DedupRing {
    capacity: usize,
    seen: DashSet<Digest>,
    order: Mutex<VecDeque<Digest>>,
}

impl DedupRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: DashSet::new(),
            order: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    /// Records `digest` if it hasn't been seen yet. Returns `true` on
    /// first sighting (the caller should act on the message), `false`
    /// if it's a duplicate (the caller should drop it silently).
    pub fn observe(&self, digest: Digest) -> bool {
        if !self.seen.insert(digest) {
            return false;
        }

        let mut order = self.order.lock().expect("dedup ring lock poisoned");
        order.push_back(digest);
        if order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Action, DiscoveryAction, Message};
    use crate::node_id::NodeId;

    fn msg(round: i32) -> Message {
        let source: NodeId = "10.0.0.1:5000".parse().unwrap();
        Message::new(source, Action::Discovery(DiscoveryAction::Register)).with_round(round)
    }

    #[test]
    fn first_sighting_admits_duplicate_rejects() {
        let ring = DedupRing::new(16);
        let digest = Digest::of(&msg(1));
        assert!(ring.observe(digest));
        assert!(!ring.observe(digest));
    }

    #[test]
    fn eviction_makes_room_for_new_entries() {
        let ring = DedupRing::new(2);
        let a = Digest::of(&msg(1));
        let b = Digest::of(&msg(2));
        let c = Digest::of(&msg(3));
        assert!(ring.observe(a));
        assert!(ring.observe(b));
        assert!(ring.observe(c));
        assert_eq!(ring.len(), 2);
        // `a` has been evicted, so it is treated as new again.
        assert!(ring.observe(a));
    }
}
