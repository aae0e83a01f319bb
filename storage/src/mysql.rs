use crate::{ClusterStore, SessionCounts, SessionRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostplane_common::types::*;
use hostplane_common::{ControlPlaneError, Result};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cluster_nodes (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        hostname VARCHAR(255) NOT NULL,
        ip VARCHAR(64) NOT NULL,
        port SMALLINT UNSIGNED NOT NULL,
        priority INT NOT NULL DEFAULT 100,
        is_primary BOOLEAN NOT NULL DEFAULT FALSE,
        is_enabled BOOLEAN NOT NULL DEFAULT TRUE,
        status VARCHAR(16) NOT NULL DEFAULT 'unknown',
        last_health_check DATETIME(3) NULL,
        response_time_ms BIGINT UNSIGNED NULL,
        INDEX idx_cluster_nodes_priority (priority, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS failover_events (
        id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        old_primary_id BIGINT UNSIGNED NULL,
        new_primary_id BIGINT UNSIGNED NOT NULL,
        reason VARCHAR(32) NOT NULL,
        created_at DATETIME(3) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cluster_leadership (
        id TINYINT UNSIGNED NOT NULL PRIMARY KEY,
        deposed_primary_id BIGINT UNSIGNED NULL,
        updated_at DATETIME(3) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id VARCHAR(128) NOT NULL PRIMARY KEY,
        user_id BIGINT UNSIGNED NOT NULL,
        payload TEXT NOT NULL,
        expires_at DATETIME(3) NOT NULL,
        created_at DATETIME(3) NOT NULL,
        updated_at DATETIME(3) NOT NULL,
        INDEX idx_sessions_user (user_id),
        INDEX idx_sessions_expires (expires_at)
    )
    "#,
];

const NODE_COLUMNS: &str = "id, hostname, ip, port, priority, is_primary, is_enabled, status, \
                            last_health_check, response_time_ms";

const SESSION_COLUMNS: &str = "id, user_id, payload, expires_at, created_at, updated_at";

fn storage_err(e: sqlx::Error) -> ControlPlaneError {
    ControlPlaneError::Storage(e.to_string())
}

/// Store backed by the shared MySQL datastore
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(storage_err)?;

        info!("Connected to cluster datastore (max_connections={})", max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create the control-plane tables if they do not exist yet
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    fn node_from_row(row: &MySqlRow) -> Result<ClusterNode> {
        let status: String = row.try_get("status").map_err(storage_err)?;
        Ok(ClusterNode {
            id: NodeId(row.try_get("id").map_err(storage_err)?),
            hostname: row.try_get("hostname").map_err(storage_err)?,
            ip: row.try_get("ip").map_err(storage_err)?,
            port: row.try_get("port").map_err(storage_err)?,
            priority: row.try_get("priority").map_err(storage_err)?,
            is_primary: row.try_get("is_primary").map_err(storage_err)?,
            is_enabled: row.try_get("is_enabled").map_err(storage_err)?,
            status: status.parse()?,
            last_health_check: row.try_get("last_health_check").map_err(storage_err)?,
            response_time_ms: row.try_get("response_time_ms").map_err(storage_err)?,
        })
    }

    fn session_from_row(row: &MySqlRow) -> Result<Session> {
        let payload: String = row.try_get("payload").map_err(storage_err)?;
        Ok(Session {
            id: row.try_get("id").map_err(storage_err)?,
            user_id: row.try_get("user_id").map_err(storage_err)?,
            payload: serde_json::from_str(&payload)
                .map_err(|e| ControlPlaneError::Storage(format!("corrupt session payload: {}", e)))?,
            expires_at: row.try_get("expires_at").map_err(storage_err)?,
            created_at: row.try_get("created_at").map_err(storage_err)?,
            updated_at: row.try_get("updated_at").map_err(storage_err)?,
        })
    }
}

#[async_trait]
impl ClusterStore for MySqlStore {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cluster_nodes ORDER BY priority ASC, id ASC",
            NODE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(Self::node_from_row).collect()
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<ClusterNode>> {
        let row = sqlx::query(&format!("SELECT {} FROM cluster_nodes WHERE id = ?", NODE_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(Self::node_from_row).transpose()
    }

    async fn insert_node(&self, node: &NewNode) -> Result<ClusterNode> {
        let result = sqlx::query(
            "INSERT INTO cluster_nodes (hostname, ip, port, priority, is_primary, is_enabled, status) \
             VALUES (?, ?, ?, ?, FALSE, TRUE, 'unknown')",
        )
        .bind(node.hostname.trim())
        .bind(node.ip.trim())
        .bind(node.port)
        .bind(node.priority)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let id = NodeId(result.last_insert_id());
        self.get_node(id)
            .await?
            .ok_or_else(|| ControlPlaneError::Storage(format!("inserted node {} not readable", id)))
    }

    async fn delete_non_primary(&self, id: NodeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cluster_nodes WHERE id = ? AND is_primary = FALSE")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_node(&self, id: NodeId, update: &NodeUpdate) -> Result<Option<ClusterNode>> {
        sqlx::query(
            "UPDATE cluster_nodes SET is_enabled = COALESCE(?, is_enabled), \
             priority = COALESCE(?, priority) WHERE id = ?",
        )
        .bind(update.enabled)
        .bind(update.priority)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        self.get_node(id).await
    }

    async fn record_health(&self, records: &[HealthRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for record in records {
            sqlx::query(
                "UPDATE cluster_nodes SET status = ?, response_time_ms = ?, last_health_check = ? \
                 WHERE id = ?",
            )
            .bind(record.status.as_str())
            .bind(record.response_time_ms)
            .bind(record.checked_at)
            .bind(record.node_id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)
    }

    async fn set_primary(&self, id: NodeId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let exists = sqlx::query("SELECT id FROM cluster_nodes WHERE id = ? FOR UPDATE")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;
        if exists.is_none() {
            return Err(ControlPlaneError::NodeNotFound(id));
        }

        // One statement flips every row, so no reader sees two primaries
        sqlx::query("UPDATE cluster_nodes SET is_primary = (id = ?)")
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        sqlx::query("UPDATE cluster_leadership SET deposed_primary_id = NULL, updated_at = ? WHERE id = 1")
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)
    }

    async fn clear_primary(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let current: Option<u64> =
            sqlx::query_scalar("SELECT id FROM cluster_nodes WHERE is_primary = TRUE FOR UPDATE")
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_err)?;

        if let Some(id) = current {
            sqlx::query("UPDATE cluster_nodes SET is_primary = FALSE WHERE is_primary = TRUE")
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;

            sqlx::query(
                "INSERT INTO cluster_leadership (id, deposed_primary_id, updated_at) VALUES (1, ?, ?) \
                 ON DUPLICATE KEY UPDATE deposed_primary_id = VALUES(deposed_primary_id), \
                 updated_at = VALUES(updated_at)",
            )
            .bind(id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)
    }

    async fn deposed_primary(&self) -> Result<Option<NodeId>> {
        let deposed: Option<Option<u64>> =
            sqlx::query_scalar("SELECT deposed_primary_id FROM cluster_leadership WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;
        Ok(deposed.flatten().map(NodeId))
    }

    async fn append_failover_event(
        &self,
        old_primary: Option<NodeId>,
        new_primary: NodeId,
        reason: FailoverReason,
    ) -> Result<FailoverEvent> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO failover_events (old_primary_id, new_primary_id, reason, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(old_primary.map(|id| id.0))
        .bind(new_primary.0)
        .bind(reason.as_str())
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(FailoverEvent {
            id: result.last_insert_id(),
            old_primary,
            new_primary,
            reason,
            created_at,
        })
    }

    async fn failover_history(&self, limit: usize) -> Result<Vec<FailoverEventView>> {
        let rows = sqlx::query(
            "SELECT e.id, e.old_primary_id, e.new_primary_id, e.reason, e.created_at, \
                    o.hostname AS old_hostname, n.hostname AS new_hostname \
             FROM failover_events e \
             LEFT JOIN cluster_nodes o ON o.id = e.old_primary_id \
             LEFT JOIN cluster_nodes n ON n.id = e.new_primary_id \
             ORDER BY e.id DESC LIMIT ?",
        )
        .bind(limit as u64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                let reason: String = row.try_get("reason").map_err(storage_err)?;
                let old_primary: Option<u64> = row.try_get("old_primary_id").map_err(storage_err)?;
                Ok(FailoverEventView {
                    event: FailoverEvent {
                        id: row.try_get("id").map_err(storage_err)?,
                        old_primary: old_primary.map(NodeId),
                        new_primary: NodeId(row.try_get("new_primary_id").map_err(storage_err)?),
                        reason: reason.parse()?,
                        created_at: row.try_get("created_at").map_err(storage_err)?,
                    },
                    old_hostname: row.try_get("old_hostname").map_err(storage_err)?,
                    new_hostname: row.try_get("new_hostname").map_err(storage_err)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SessionRepository for MySqlStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let payload = serde_json::to_string(&session.payload)
            .map_err(|e| ControlPlaneError::Internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO sessions (id, user_id, payload, expires_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(payload)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn set_expiry(&self, id: &str, expires_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET expires_at = ?, updated_at = ? WHERE id = ?")
            .bind(expires_at)
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_for_user(&self, user_id: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<SessionCounts> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(CASE WHEN expires_at > ? THEN 1 END) AS live FROM sessions",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        let total: i64 = row.try_get("total").map_err(storage_err)?;
        let live: i64 = row.try_get("live").map_err(storage_err)?;
        Ok(SessionCounts {
            total: total.max(0) as u64,
            live: live.max(0) as u64,
        })
    }
}
