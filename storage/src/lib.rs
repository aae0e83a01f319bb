pub mod memory;
pub mod mysql;
pub mod session;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostplane_common::types::*;
use hostplane_common::Result;
use serde::Serialize;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;
pub use session::{SessionStats, SessionStore};

/// Persistent node registry and failover audit log
///
/// Every mutation is a single committed write; concurrent callers are
/// serialized by the backing datastore, not by the caller.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// All nodes ordered by priority ascending, then id ascending
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>>;

    async fn get_node(&self, id: NodeId) -> Result<Option<ClusterNode>>;

    /// Insert an enabled, non-primary node with unknown status
    async fn insert_node(&self, node: &NewNode) -> Result<ClusterNode>;

    /// Delete a node unless it is primary. Returns false if nothing was deleted.
    async fn delete_non_primary(&self, id: NodeId) -> Result<bool>;

    async fn update_node(&self, id: NodeId, update: &NodeUpdate) -> Result<Option<ClusterNode>>;

    /// Persist the outcome of a batch of probes
    async fn record_health(&self, records: &[HealthRecord]) -> Result<()>;

    /// Set `is_primary` on exactly `id` and clear it everywhere else. Forgets
    /// any deposed primary.
    async fn set_primary(&self, id: NodeId) -> Result<()>;

    /// Clear `is_primary` on every node. A node that was primary is kept as the
    /// deposed primary until the next `set_primary`.
    async fn clear_primary(&self) -> Result<()>;

    /// The primary removed by the last `clear_primary`, if no primary was set since
    async fn deposed_primary(&self) -> Result<Option<NodeId>>;

    async fn append_failover_event(
        &self,
        old_primary: Option<NodeId>,
        new_primary: NodeId,
        reason: FailoverReason,
    ) -> Result<FailoverEvent>;

    /// Newest first, joined with hostnames
    async fn failover_history(&self, limit: usize) -> Result<Vec<FailoverEventView>>;
}

/// Row-level access to the shared session table
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<()>;

    /// Raw row lookup, expired rows included
    async fn get(&self, id: &str) -> Result<Option<Session>>;

    async fn set_expiry(&self, id: &str, expires_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn delete_for_user(&self, user_id: u64) -> Result<u64>;

    /// Delete rows with `expires_at < now`
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn counts(&self, now: DateTime<Utc>) -> Result<SessionCounts>;
}

/// Row counts of the session table at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub total: u64,
    pub live: u64,
}

/// The pair of stores a control-plane process works against
#[derive(Clone)]
pub struct Stores {
    pub cluster: Arc<dyn ClusterStore>,
    pub sessions: Arc<dyn SessionRepository>,
}

impl Stores {
    /// Process-local stores, for single-node setups and tests
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            cluster: store.clone(),
            sessions: store,
        }
    }

    /// Stores backed by the shared MySQL datastore
    pub async fn mysql(url: &str, max_connections: u32) -> Result<Self> {
        let store = Arc::new(MySqlStore::connect(url, max_connections).await?);
        store.migrate().await?;
        Ok(Self {
            cluster: store.clone(),
            sessions: store,
        })
    }
}
