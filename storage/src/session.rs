use crate::SessionRepository;
use chrono::{Duration, Utc};
use hostplane_common::types::Session;
use hostplane_common::Result;
use metrics::counter;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Default session lifetime
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;

const SESSION_ID_BYTES: usize = 32;

/// Session store shared by every control-plane node
///
/// Any node can validate or renew a session created by any other node, since
/// all state lives in the session table.
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    ttl: Duration,
}

/// Session table statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total: u64,
    pub active: u64,
    /// Expired rows not yet removed by a cleanup sweep
    pub expired: u64,
    pub ttl_seconds: i64,
}

impl SessionStore {
    pub fn new(repo: Arc<dyn SessionRepository>, ttl_secs: i64) -> Self {
        Self {
            repo,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    fn generate_id() -> String {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Create a session for `user_id` expiring one TTL from now
    pub async fn create_session(&self, user_id: u64, payload: serde_json::Value) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Self::generate_id(),
            user_id,
            payload,
            expires_at: now + self.ttl,
            created_at: now,
            updated_at: now,
        };
        self.repo.insert(&session).await?;
        debug!("Created session for user {}", user_id);
        Ok(session)
    }

    /// Returns the session only while it has not expired
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let now = Utc::now();
        Ok(self.repo.get(id).await?.filter(|s| s.is_live_at(now)))
    }

    /// Extend a live session by one TTL. Expired sessions are not revived.
    pub async fn touch_session(&self, id: &str) -> Result<Option<Session>> {
        let Some(mut session) = self.get_session(id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        session.expires_at = now + self.ttl;
        session.updated_at = now;
        if !self.repo.set_expiry(id, session.expires_at, now).await? {
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub async fn destroy_session(&self, id: &str) -> Result<bool> {
        self.repo.delete(id).await
    }

    pub async fn destroy_user_sessions(&self, user_id: u64) -> Result<u64> {
        let removed = self.repo.delete_for_user(user_id).await?;
        info!("Revoked {} sessions for user {}", removed, user_id);
        Ok(removed)
    }

    /// Delete every expired row. Idempotent; safe to run from several nodes at once.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let removed = self.repo.delete_expired(Utc::now()).await?;
        counter!("hostplane.sessions.cleaned").increment(removed);
        if removed > 0 {
            info!("Session cleanup removed {} expired sessions", removed);
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<SessionStats> {
        let counts = self.repo.counts(Utc::now()).await?;
        Ok(SessionStats {
            total: counts.total,
            active: counts.live,
            expired: counts.total.saturating_sub(counts.live),
            ttl_seconds: self.ttl.num_seconds(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;

    fn store() -> (Arc<MemoryStore>, SessionStore) {
        let repo = Arc::new(MemoryStore::new());
        let sessions = SessionStore::new(repo.clone(), DEFAULT_SESSION_TTL_SECS);
        (repo, sessions)
    }

    async fn insert_expired(repo: &MemoryStore, id: &str, user_id: u64) {
        let past = Utc::now() - Duration::minutes(5);
        repo.insert(&Session {
            id: id.to_string(),
            user_id,
            payload: json!({}),
            expires_at: past,
            created_at: past - Duration::hours(1),
            updated_at: past - Duration::hours(1),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let (_, sessions) = store();
        let session = sessions.create_session(7, json!({"role": "admin"})).await.unwrap();

        assert_eq!(session.id.len(), SESSION_ID_BYTES * 2);
        let fetched = sessions.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.user_id, 7);
        assert_eq!(fetched.payload["role"], "admin");

        let other = sessions.create_session(7, json!({})).await.unwrap();
        assert_ne!(other.id, session.id);
    }

    #[tokio::test]
    async fn test_expired_session_is_absent() {
        let (repo, sessions) = store();
        insert_expired(&repo, "stale", 1).await;

        // Row still exists physically until the next sweep
        assert!(repo.get("stale").await.unwrap().is_some());
        assert!(sessions.get_session("stale").await.unwrap().is_none());
        assert!(sessions.touch_session("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_touch_extends_expiry() {
        let (repo, sessions) = store();
        let session = sessions.create_session(1, json!(null)).await.unwrap();
        let shortened = Utc::now() + Duration::seconds(10);
        repo.set_expiry(&session.id, shortened, Utc::now()).await.unwrap();

        let touched = sessions.touch_session(&session.id).await.unwrap().unwrap();
        assert!(touched.expires_at > shortened + Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_destroy_sessions() {
        let (_, sessions) = store();
        let a = sessions.create_session(1, json!(null)).await.unwrap();
        sessions.create_session(1, json!(null)).await.unwrap();
        let c = sessions.create_session(2, json!(null)).await.unwrap();

        assert!(sessions.destroy_session(&a.id).await.unwrap());
        assert!(!sessions.destroy_session(&a.id).await.unwrap());
        assert_eq!(sessions.destroy_user_sessions(1).await.unwrap(), 1);
        assert!(sessions.get_session(&c.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (repo, sessions) = store();
        insert_expired(&repo, "old-1", 1).await;
        insert_expired(&repo, "old-2", 2).await;
        sessions.create_session(3, json!(null)).await.unwrap();

        let stats = sessions.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.expired, 2);

        assert_eq!(sessions.cleanup_expired().await.unwrap(), 2);
        assert_eq!(sessions.cleanup_expired().await.unwrap(), 0);
        assert_eq!(sessions.stats().await.unwrap().total, 1);
    }
}
