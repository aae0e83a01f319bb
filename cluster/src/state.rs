use chrono::{DateTime, Utc};
use hostplane_common::types::*;
use serde::Serialize;

/// Snapshot of the node registry at one point in time
///
/// Loaded from the datastore at defined points (sweep start, election start)
/// and passed by value afterwards; nothing mutates it in place.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterState {
    /// Registry order: priority ascending, then id ascending
    pub nodes: Vec<ClusterNode>,
    pub loaded_at: DateTime<Utc>,
}

impl ClusterState {
    pub fn new(mut nodes: Vec<ClusterNode>) -> Self {
        nodes.sort_by(registry_order);
        Self {
            nodes,
            loaded_at: Utc::now(),
        }
    }

    pub fn get_node(&self, id: NodeId) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn primary(&self) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.is_primary)
    }

    pub fn enabled_nodes(&self) -> Vec<ClusterNode> {
        self.nodes.iter().filter(|n| n.is_enabled).cloned().collect()
    }

    /// Enabled nodes whose last check was healthy, in registry order
    pub fn eligible_nodes(&self) -> Vec<ClusterNode> {
        self.nodes.iter().filter(|n| n.is_eligible()).cloned().collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_healthy()).count()
    }
}
