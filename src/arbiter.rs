//! Suggestion Arbiter: collects the topology-change and
//! aggregation-weight suggestions awareness components register
//! against the suggestion barrier at round end, and resolves
//! conflicts by priority rather than by arrival order.

use std::collections::HashSet;

use crate::node_id::NodeId;

/// The action a suggestion asks the connection manager or the
/// aggregation buffer to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SACommandKind {
    Maintain,
    Search,
    Reconnect,
    Disconnect,
    AdjustWeight,
    DiscardWeight,
}

impl SACommandKind {
    fn is_connection_command(self) -> bool {
        matches!(
            self,
            SACommandKind::Maintain
                | SACommandKind::Search
                | SACommandKind::Reconnect
                | SACommandKind::Disconnect
        )
    }

    fn is_aggregation_command(self) -> bool {
        matches!(self, SACommandKind::AdjustWeight | SACommandKind::DiscardWeight)
    }
}

/// Priority used to resolve conflicting suggestions. Ordered so the
/// derived `Ord` impl sorts highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Maintenance,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct SACommand {
    pub peer: NodeId,
    pub kind: SACommandKind,
    pub priority: Priority,
    /// The weight an `AdjustWeight`/`DiscardWeight` command would set.
    pub weight: Option<f64>,
    /// The set of sources that would remain included in the buffer
    /// after an `AdjustWeight`/`DiscardWeight` command is applied.
    pub included_sources: Option<HashSet<NodeId>>,
}

impl SACommand {
    /// Builds a connection-management suggestion (maintain, search,
    /// reconnect, disconnect).
    pub fn connection(peer: NodeId, kind: SACommandKind, priority: Priority) -> Self {
        Self {
            peer,
            kind,
            priority,
            weight: None,
            included_sources: None,
        }
    }

    /// Builds an aggregation-weight suggestion (adjust or discard a
    /// source's weight in the buffer).
    pub fn aggregation(
        peer: NodeId,
        kind: SACommandKind,
        priority: Priority,
        weight: f64,
        included_sources: HashSet<NodeId>,
    ) -> Self {
        Self {
            peer,
            kind,
            priority,
            weight: Some(weight),
            included_sources: Some(included_sources),
        }
    }

    /// The conflict table: two disconnects conflict only if
    /// they target the same peer; a disconnect conflicts with any
    /// maintain/search/reconnect regardless of target; two
    /// maintain/search/reconnect commands conflict only if they share
    /// a target; two aggregation commands conflict only if they
    /// disagree on both the weight for a common source and the
    /// included-source set.
    fn conflicts_with(&self, other: &SACommand) -> bool {
        use SACommandKind::*;
        match (self.kind, other.kind) {
            (Disconnect, Disconnect) => self.peer == other.peer,
            (Disconnect, Maintain | Search | Reconnect) | (Maintain | Search | Reconnect, Disconnect) => true,
            (k1, k2) if k1.is_connection_command() && k2.is_connection_command() => self.peer == other.peer,
            (k1, k2) if k1.is_aggregation_command() && k2.is_aggregation_command() => {
                let (Some(wa), Some(wb)) = (self.weight, other.weight) else {
                    return false;
                };
                let (Some(sources_a), Some(sources_b)) = (&self.included_sources, &other.included_sources) else {
                    return false;
                };
                (wa - wb).abs() > 0.0 && sources_a != sources_b
            }
            _ => false,
        }
    }
}

/// Accumulates suggestions for the current round and resolves them to
/// a conflict-free subset.
#[derive(Default)]
pub struct SuggestionArbiter {
    suggestions: Vec<SACommand>,
}

impl SuggestionArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: SACommand) {
        self.suggestions.push(command);
    }

    pub fn clear(&mut self) {
        self.suggestions.clear();
    }

    /// Greedily accepts suggestions in priority order (registration
    /// order breaking ties, since `sort_by` is stable), skipping any
    /// candidate that conflicts with one already accepted. The result
    /// is a conflict-free subset that preserves the highest-priority
    /// command whenever two suggestions collide.
    pub fn resolve(&self) -> Vec<SACommand> {
        let mut ordered: Vec<&SACommand> = self.suggestions.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut accepted: Vec<SACommand> = Vec::new();
        for candidate in ordered {
            if accepted.iter().any(|kept| kept.conflicts_with(candidate)) {
                continue;
            }
            accepted.push(candidate.clone());
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str) -> NodeId {
        addr.parse().unwrap()
    }

    #[test]
    fn higher_priority_suggestion_wins_on_the_same_peer() {
        let mut arbiter = SuggestionArbiter::new();
        let peer = node("10.0.0.1:5000");
        arbiter.register(SACommand::connection(peer, SACommandKind::Maintain, Priority::Low));
        arbiter.register(SACommand::connection(peer, SACommandKind::Reconnect, Priority::Critical));

        let resolved = arbiter.resolve();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].kind, SACommandKind::Reconnect);
    }

    #[test]
    fn tie_keeps_first_registered() {
        let mut arbiter = SuggestionArbiter::new();
        let peer = node("10.0.0.1:5000");
        arbiter.register(SACommand::connection(peer, SACommandKind::Search, Priority::Medium));
        arbiter.register(SACommand::connection(peer, SACommandKind::Maintain, Priority::Medium));

        let resolved = arbiter.resolve();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].kind, SACommandKind::Search);
    }

    #[test]
    fn disconnect_conflicts_with_reconnect_on_a_different_peer() {
        let mut arbiter = SuggestionArbiter::new();
        let a = node("10.0.0.1:5000");
        let b = node("10.0.0.2:5000");
        arbiter.register(SACommand::connection(a, SACommandKind::Disconnect, Priority::High));
        arbiter.register(SACommand::connection(b, SACommandKind::Reconnect, Priority::Low));

        let resolved = arbiter.resolve();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].kind, SACommandKind::Disconnect);
    }

    #[test]
    fn disconnects_on_different_peers_do_not_conflict() {
        let mut arbiter = SuggestionArbiter::new();
        let a = node("10.0.0.1:5000");
        let b = node("10.0.0.2:5000");
        arbiter.register(SACommand::connection(a, SACommandKind::Disconnect, Priority::Low));
        arbiter.register(SACommand::connection(b, SACommandKind::Disconnect, Priority::Low));

        let resolved = arbiter.resolve();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn aggregation_commands_agreeing_on_weight_do_not_conflict() {
        let mut arbiter = SuggestionArbiter::new();
        let peer = node("10.0.0.1:5000");
        let sources: HashSet<NodeId> = [peer].into_iter().collect();
        arbiter.register(SACommand::aggregation(
            peer,
            SACommandKind::AdjustWeight,
            Priority::Medium,
            0.5,
            sources.clone(),
        ));
        arbiter.register(SACommand::aggregation(
            peer,
            SACommandKind::AdjustWeight,
            Priority::Low,
            0.5,
            sources,
        ));

        assert_eq!(arbiter.resolve().len(), 2);
    }

    #[test]
    fn aggregation_commands_disagreeing_on_weight_and_sources_conflict() {
        let mut arbiter = SuggestionArbiter::new();
        let peer = node("10.0.0.1:5000");
        let other = node("10.0.0.2:5000");
        arbiter.register(SACommand::aggregation(
            peer,
            SACommandKind::AdjustWeight,
            Priority::Low,
            0.5,
            [peer].into_iter().collect(),
        ));
        arbiter.register(SACommand::aggregation(
            peer,
            SACommandKind::DiscardWeight,
            Priority::High,
            0.0,
            [peer, other].into_iter().collect(),
        ));

        let resolved = arbiter.resolve();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].kind, SACommandKind::DiscardWeight);
    }
}
