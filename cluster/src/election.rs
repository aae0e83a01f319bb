use hostplane_common::types::*;

/// Decides which candidate becomes primary
///
/// Candidates are the enabled nodes that passed their latest health check, in
/// registry order. This is the seam for swapping the priority rule for a
/// quorum-based algorithm; the load balancer and replication orchestrator do
/// not depend on it.
pub trait ElectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, candidates: &[ClusterNode]) -> Option<NodeId>;
}

/// Lowest priority value wins, ties broken by lowest id
///
/// No quorum: two controllers on opposite sides of a partition can each elect
/// a different primary.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityElection;

impl ElectionStrategy for PriorityElection {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select(&self, candidates: &[ClusterNode]) -> Option<NodeId> {
        candidates
            .iter()
            .filter(|n| n.is_eligible())
            .min_by(|a, b| registry_order(a, b))
            .map(|n| n.id)
    }
}
