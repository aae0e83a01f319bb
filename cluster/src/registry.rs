use crate::state::ClusterState;
use hostplane_common::types::*;
use hostplane_common::{ControlPlaneError, Result};
use hostplane_storage::ClusterStore;
use std::sync::Arc;
use tracing::info;

/// Node registry - source of truth for cluster membership
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn ClusterStore>,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ClusterStore> {
        &self.store
    }

    /// All nodes ordered by priority, then id
    pub async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        self.store.list_nodes().await
    }

    pub async fn get_node(&self, id: NodeId) -> Result<ClusterNode> {
        self.store
            .get_node(id)
            .await?
            .ok_or(ControlPlaneError::NodeNotFound(id))
    }

    /// Refresh the cluster snapshot from the datastore
    pub async fn load_state(&self) -> Result<ClusterState> {
        Ok(ClusterState::new(self.store.list_nodes().await?))
    }

    /// Register a new enabled, non-primary node
    pub async fn add_node(&self, node: NewNode) -> Result<ClusterNode> {
        node.validate()?;
        let created = self.store.insert_node(&node).await?;
        info!(
            "Added node to cluster: node_id={}, hostname={}, addr={}:{}, priority={}",
            created.id, created.hostname, created.ip, created.port, created.priority
        );
        Ok(created)
    }

    /// Remove a node; the current primary is protected
    pub async fn remove_node(&self, id: NodeId) -> Result<()> {
        let node = self.get_node(id).await?;
        if node.is_primary {
            return Err(ControlPlaneError::PrimaryNodeProtected(id));
        }

        if !self.store.delete_non_primary(id).await? {
            // Lost a race with an election or another delete
            return match self.store.get_node(id).await? {
                Some(n) if n.is_primary => Err(ControlPlaneError::PrimaryNodeProtected(id)),
                _ => Err(ControlPlaneError::NodeNotFound(id)),
            };
        }

        info!("Removed node from cluster: node_id={}, hostname={}", id, node.hostname);
        Ok(())
    }

    /// Enable/disable a node or change its priority
    pub async fn update_node(&self, id: NodeId, update: NodeUpdate) -> Result<ClusterNode> {
        let node = self.get_node(id).await?;
        if update.enabled == Some(false) && node.is_primary {
            return Err(ControlPlaneError::PrimaryNodeProtected(id));
        }
        if matches!(update.priority, Some(p) if p < 0) {
            return Err(ControlPlaneError::validation("priority must be >= 0"));
        }

        let updated = self
            .store
            .update_node(id, &update)
            .await?
            .ok_or(ControlPlaneError::NodeNotFound(id))?;
        info!(
            "Updated node: node_id={}, enabled={}, priority={}",
            id, updated.is_enabled, updated.priority
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostplane_storage::MemoryStore;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn new_node(hostname: &str, priority: i32) -> NewNode {
        NewNode {
            hostname: hostname.to_string(),
            ip: "10.1.0.1".to_string(),
            port: 8443,
            priority,
        }
    }

    #[tokio::test]
    async fn test_add_node_defaults() {
        let registry = registry();
        let node = registry.add_node(new_node("cp1", 10)).await.unwrap();

        assert!(node.is_enabled);
        assert!(!node.is_primary);
        assert_eq!(node.status, NodeStatus::Unknown);
        assert_eq!(registry.list_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_node_requires_hostname_and_ip() {
        let registry = registry();
        let mut input = new_node("", 10);
        assert!(matches!(
            registry.add_node(input.clone()).await,
            Err(ControlPlaneError::Validation(_))
        ));

        input.hostname = "cp1".to_string();
        input.ip = String::new();
        assert!(matches!(
            registry.add_node(input).await,
            Err(ControlPlaneError::Validation(_))
        ));
        assert!(registry.list_nodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_node_protects_primary() {
        let registry = registry();
        let primary = registry.add_node(new_node("cp1", 10)).await.unwrap();
        let other = registry.add_node(new_node("cp2", 20)).await.unwrap();
        registry.store().set_primary(primary.id).await.unwrap();

        assert!(matches!(
            registry.remove_node(primary.id).await,
            Err(ControlPlaneError::PrimaryNodeProtected(_))
        ));

        registry.remove_node(other.id).await.unwrap();
        let ids: Vec<NodeId> = registry.list_nodes().await.unwrap().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![primary.id]);

        assert!(matches!(
            registry.remove_node(other.id).await,
            Err(ControlPlaneError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_node() {
        let registry = registry();
        let primary = registry.add_node(new_node("cp1", 10)).await.unwrap();
        let other = registry.add_node(new_node("cp2", 20)).await.unwrap();
        registry.store().set_primary(primary.id).await.unwrap();

        let disable = NodeUpdate {
            enabled: Some(false),
            priority: None,
        };
        assert!(matches!(
            registry.update_node(primary.id, disable.clone()).await,
            Err(ControlPlaneError::PrimaryNodeProtected(_))
        ));

        let updated = registry.update_node(other.id, disable).await.unwrap();
        assert!(!updated.is_enabled);

        let reprioritized = registry
            .update_node(
                other.id,
                NodeUpdate {
                    enabled: None,
                    priority: Some(5),
                },
            )
            .await
            .unwrap();
        assert_eq!(reprioritized.priority, 5);
        assert_eq!(registry.list_nodes().await.unwrap()[0].id, other.id);
    }
}
