use crate::{ClusterStore, SessionCounts, SessionRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostplane_common::types::*;
use hostplane_common::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// In-process implementation of both store traits
///
/// Each trait method takes the lock once, so every mutation is atomic with
/// respect to other callers in the same process.
pub struct MemoryStore {
    cluster: RwLock<ClusterTables>,
    sessions: RwLock<HashMap<String, Session>>,
}

#[derive(Default)]
struct ClusterTables {
    nodes: BTreeMap<NodeId, ClusterNode>,
    next_node_id: u64,
    events: Vec<FailoverEvent>,
    next_event_id: u64,
    deposed: Option<NodeId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            cluster: RwLock::new(ClusterTables {
                next_node_id: 1,
                next_event_id: 1,
                ..Default::default()
            }),
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let mut nodes: Vec<ClusterNode> = self.cluster.read().nodes.values().cloned().collect();
        nodes.sort_by(registry_order);
        Ok(nodes)
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<ClusterNode>> {
        Ok(self.cluster.read().nodes.get(&id).cloned())
    }

    async fn insert_node(&self, node: &NewNode) -> Result<ClusterNode> {
        let mut tables = self.cluster.write();
        let id = NodeId(tables.next_node_id);
        tables.next_node_id += 1;

        let row = ClusterNode {
            id,
            hostname: node.hostname.trim().to_string(),
            ip: node.ip.trim().to_string(),
            port: node.port,
            priority: node.priority,
            is_primary: false,
            is_enabled: true,
            status: NodeStatus::Unknown,
            last_health_check: None,
            response_time_ms: None,
        };
        tables.nodes.insert(id, row.clone());
        Ok(row)
    }

    async fn delete_non_primary(&self, id: NodeId) -> Result<bool> {
        let mut tables = self.cluster.write();
        match tables.nodes.get(&id) {
            Some(node) if !node.is_primary => {
                tables.nodes.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_node(&self, id: NodeId, update: &NodeUpdate) -> Result<Option<ClusterNode>> {
        let mut tables = self.cluster.write();
        let Some(node) = tables.nodes.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(enabled) = update.enabled {
            node.is_enabled = enabled;
        }
        if let Some(priority) = update.priority {
            node.priority = priority;
        }
        Ok(Some(node.clone()))
    }

    async fn record_health(&self, records: &[HealthRecord]) -> Result<()> {
        let mut tables = self.cluster.write();
        for record in records {
            // Node may have been removed while the probe was in flight
            if let Some(node) = tables.nodes.get_mut(&record.node_id) {
                node.status = record.status;
                node.response_time_ms = Some(record.response_time_ms);
                node.last_health_check = Some(record.checked_at);
            }
        }
        Ok(())
    }

    async fn set_primary(&self, id: NodeId) -> Result<()> {
        let mut tables = self.cluster.write();
        if !tables.nodes.contains_key(&id) {
            return Err(hostplane_common::ControlPlaneError::NodeNotFound(id));
        }
        for node in tables.nodes.values_mut() {
            node.is_primary = node.id == id;
        }
        tables.deposed = None;
        Ok(())
    }

    async fn clear_primary(&self) -> Result<()> {
        let mut tables = self.cluster.write();
        let mut cleared = None;
        for node in tables.nodes.values_mut() {
            if node.is_primary {
                cleared = Some(node.id);
            }
            node.is_primary = false;
        }
        if cleared.is_some() {
            tables.deposed = cleared;
        }
        Ok(())
    }

    async fn deposed_primary(&self) -> Result<Option<NodeId>> {
        Ok(self.cluster.read().deposed)
    }

    async fn append_failover_event(
        &self,
        old_primary: Option<NodeId>,
        new_primary: NodeId,
        reason: FailoverReason,
    ) -> Result<FailoverEvent> {
        let mut tables = self.cluster.write();
        let event = FailoverEvent {
            id: tables.next_event_id,
            old_primary,
            new_primary,
            reason,
            created_at: Utc::now(),
        };
        tables.next_event_id += 1;
        tables.events.push(event.clone());
        Ok(event)
    }

    async fn failover_history(&self, limit: usize) -> Result<Vec<FailoverEventView>> {
        let tables = self.cluster.read();
        let hostname = |id: NodeId| tables.nodes.get(&id).map(|n| n.hostname.clone());

        Ok(tables
            .events
            .iter()
            .rev()
            .take(limit)
            .map(|event| FailoverEventView {
                old_hostname: event.old_primary.and_then(hostname),
                new_hostname: hostname(event.new_primary),
                event: event.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        self.sessions.write().insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(id).cloned())
    }

    async fn set_expiry(&self, id: &str, expires_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Result<bool> {
        match self.sessions.write().get_mut(id) {
            Some(session) => {
                session.expires_at = expires_at;
                session.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.sessions.write().remove(id).is_some())
    }

    async fn delete_for_user(&self, user_id: u64) -> Result<u64> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<SessionCounts> {
        let sessions = self.sessions.read();
        Ok(SessionCounts {
            total: sessions.len() as u64,
            live: sessions.values().filter(|s| s.is_live_at(now)).count() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_node(hostname: &str, priority: i32) -> NewNode {
        NewNode {
            hostname: hostname.to_string(),
            ip: "127.0.0.1".to_string(),
            port: 8443,
            priority,
        }
    }

    #[tokio::test]
    async fn test_list_nodes_ordering() {
        let store = MemoryStore::new();
        store.insert_node(&new_node("c", 30)).await.unwrap();
        store.insert_node(&new_node("a", 10)).await.unwrap();
        store.insert_node(&new_node("b", 10)).await.unwrap();

        let names: Vec<String> = store
            .list_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.hostname)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_set_primary_is_exclusive() {
        let store = MemoryStore::new();
        let a = store.insert_node(&new_node("a", 10)).await.unwrap();
        let b = store.insert_node(&new_node("b", 20)).await.unwrap();

        store.set_primary(a.id).await.unwrap();
        store.set_primary(b.id).await.unwrap();

        let primaries: Vec<NodeId> = store
            .list_nodes()
            .await
            .unwrap()
            .into_iter()
            .filter(|n| n.is_primary)
            .map(|n| n.id)
            .collect();
        assert_eq!(primaries, vec![b.id]);

        assert!(store.set_primary(NodeId(99)).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_primary_remembers_deposed_node() {
        let store = MemoryStore::new();
        let a = store.insert_node(&new_node("a", 10)).await.unwrap();
        let b = store.insert_node(&new_node("b", 20)).await.unwrap();
        assert_eq!(store.deposed_primary().await.unwrap(), None);

        store.set_primary(a.id).await.unwrap();
        store.clear_primary().await.unwrap();
        assert_eq!(store.deposed_primary().await.unwrap(), Some(a.id));

        // Repeated clears while headless keep the original primary
        store.clear_primary().await.unwrap();
        assert_eq!(store.deposed_primary().await.unwrap(), Some(a.id));

        store.set_primary(b.id).await.unwrap();
        assert_eq!(store.deposed_primary().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_non_primary() {
        let store = MemoryStore::new();
        let a = store.insert_node(&new_node("a", 10)).await.unwrap();
        store.set_primary(a.id).await.unwrap();

        assert!(!store.delete_non_primary(a.id).await.unwrap());
        store.clear_primary().await.unwrap();
        assert!(store.delete_non_primary(a.id).await.unwrap());
        assert!(store.get_node(a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failover_history_newest_first() {
        let store = MemoryStore::new();
        let a = store.insert_node(&new_node("a", 10)).await.unwrap();
        let b = store.insert_node(&new_node("b", 20)).await.unwrap();

        store
            .append_failover_event(None, a.id, FailoverReason::Manual)
            .await
            .unwrap();
        store
            .append_failover_event(Some(a.id), b.id, FailoverReason::HealthTriggered)
            .await
            .unwrap();

        let history = store.failover_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event.reason, FailoverReason::HealthTriggered);
        assert_eq!(history[0].old_hostname.as_deref(), Some("a"));
        assert_eq!(history[0].new_hostname.as_deref(), Some("b"));

        assert_eq!(store.failover_history(1).await.unwrap().len(), 1);
    }
}
