//! Propagator: decides which neighbors a node's own
//! model update gets sent to each round, based on how far along the
//! node is in joining the federation.

use crate::node_id::NodeId;

/// Where a node is in its participation lifecycle, which determines
/// how widely it propagates its own update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationPhase {
    /// Still bootstrapping into the federation: send to every direct
    /// neighbor so the rest of the mesh learns this node exists.
    Initialization,
    /// Normal operation: send only to neighbors the aggregation
    /// buffer's federation set actually expects an update from.
    Stable,
    /// Catching up after a push (see `aggregation::PushAcceleration`):
    /// send to federation neighbors plus anyone believed to be ahead,
    /// so the catch-up is visible immediately rather than waiting for
    /// the next natural round boundary.
    Push,
}

pub struct Propagator {
    phase: PropagationPhase,
}

impl Propagator {
    pub fn new() -> Self {
        Self {
            phase: PropagationPhase::Initialization,
        }
    }

    pub fn phase(&self) -> PropagationPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: PropagationPhase) {
        self.phase = phase;
    }

    /// Selects which of `direct_neighbors` should receive this
    /// node's own update this round, given the current federation
    /// membership and (for the push phase) the set believed ahead.
    pub fn select_recipients(
        &self,
        direct_neighbors: &[NodeId],
        federation: &[NodeId],
        ahead: &[NodeId],
    ) -> Vec<NodeId> {
        match self.phase {
            PropagationPhase::Initialization => direct_neighbors.to_vec(),
            PropagationPhase::Stable => direct_neighbors
                .iter()
                .filter(|n| federation.contains(n))
                .copied()
                .collect(),
            PropagationPhase::Push => direct_neighbors
                .iter()
                .filter(|n| federation.contains(n) || ahead.contains(n))
                .copied()
                .collect(),
        }
    }
}

impl Default for Propagator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str) -> NodeId {
        addr.parse().unwrap()
    }

    #[test]
    fn initialization_phase_sends_to_everyone() {
        let propagator = Propagator::new();
        let neighbors = vec![node("10.0.0.1:5000"), node("10.0.0.2:5000")];
        let recipients = propagator.select_recipients(&neighbors, &[], &[]);
        assert_eq!(recipients, neighbors);
    }

    #[test]
    fn stable_phase_restricts_to_the_federation() {
        let mut propagator = Propagator::new();
        propagator.set_phase(PropagationPhase::Stable);
        let a = node("10.0.0.1:5000");
        let b = node("10.0.0.2:5000");
        let recipients = propagator.select_recipients(&[a, b], &[a], &[]);
        assert_eq!(recipients, vec![a]);
    }

    #[test]
    fn push_phase_includes_nodes_believed_ahead() {
        let mut propagator = Propagator::new();
        propagator.set_phase(PropagationPhase::Push);
        let a = node("10.0.0.1:5000");
        let b = node("10.0.0.2:5000");
        let recipients = propagator.select_recipients(&[a, b], &[], &[b]);
        assert_eq!(recipients, vec![b]);
    }
}
