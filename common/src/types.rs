use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::{ControlPlaneError, Result};

/// Identifier of a registered cluster node (assigned by the registry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Last observed liveness of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Never probed
    Unknown,
    Healthy,
    Unhealthy,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Healthy => "healthy",
            NodeStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unknown" => Ok(NodeStatus::Unknown),
            "healthy" => Ok(NodeStatus::Healthy),
            "unhealthy" => Ok(NodeStatus::Unhealthy),
            other => Err(ControlPlaneError::validation(format!(
                "unknown node status '{}'",
                other
            ))),
        }
    }
}

/// Identity and operational state of one control-plane member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: NodeId,
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    /// Lower value means higher precedence
    pub priority: i32,
    pub is_primary: bool,
    pub is_enabled: bool,
    pub status: NodeStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
}

impl ClusterNode {
    pub fn is_healthy(&self) -> bool {
        self.status == NodeStatus::Healthy
    }

    /// Enabled and last seen healthy: may be primary or receive traffic
    pub fn is_eligible(&self) -> bool {
        self.is_enabled && self.is_healthy()
    }

    /// Base URL of the node's control endpoint
    pub fn base_url(&self) -> String {
        match self.ip.parse::<IpAddr>() {
            Ok(IpAddr::V6(addr)) => format!("http://[{}]:{}", addr, self.port),
            _ => format!("http://{}:{}", self.ip, self.port),
        }
    }
}

/// Registry ordering: priority ascending, then id ascending
pub fn registry_order(a: &ClusterNode, b: &ClusterNode) -> std::cmp::Ordering {
    a.priority.cmp(&b.priority).then(a.id.cmp(&b.id))
}

/// Input for the "add node" administrative action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNode {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip: String,
    pub port: u16,
    pub priority: i32,
}

impl NewNode {
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(ControlPlaneError::validation("hostname is required"));
        }
        if self.ip.trim().is_empty() {
            return Err(ControlPlaneError::validation("ip is required"));
        }
        if self.ip.trim().parse::<IpAddr>().is_err() {
            return Err(ControlPlaneError::validation(format!(
                "'{}' is not a valid IP address",
                self.ip
            )));
        }
        if self.port == 0 {
            return Err(ControlPlaneError::validation("port must be non-zero"));
        }
        if self.priority < 0 {
            return Err(ControlPlaneError::validation("priority must be >= 0"));
        }
        Ok(())
    }
}

/// Partial administrative update of a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

/// Result of a single liveness probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub response_time_ms: u64,
    pub checked_at: DateTime<Utc>,
}

/// Why primary status moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailoverReason {
    HealthTriggered,
    Manual,
}

impl FailoverReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverReason::HealthTriggered => "health-triggered",
            FailoverReason::Manual => "manual",
        }
    }
}

impl std::str::FromStr for FailoverReason {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "health-triggered" => Ok(FailoverReason::HealthTriggered),
            "manual" => Ok(FailoverReason::Manual),
            other => Err(ControlPlaneError::validation(format!(
                "unknown failover reason '{}'",
                other
            ))),
        }
    }
}

/// Append-only audit record of a completed failover
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub id: u64,
    pub old_primary: Option<NodeId>,
    pub new_primary: NodeId,
    pub reason: FailoverReason,
    pub created_at: DateTime<Utc>,
}

/// Failover event joined with node hostnames
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverEventView {
    #[serde(flatten)]
    pub event: FailoverEvent,
    pub old_hostname: Option<String>,
    pub new_hostname: Option<String>,
}

/// A session shared by every control-plane node through the datastore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: u64,
    pub payload: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Connection profile of one database server in the replication topology
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
}

fn default_mysql_port() -> u16 {
    3306
}

impl std::fmt::Debug for ServerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProfile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, priority: i32) -> ClusterNode {
        ClusterNode {
            id: NodeId(id),
            hostname: format!("cp{}", id),
            ip: "10.0.0.1".to_string(),
            port: 8443,
            priority,
            is_primary: false,
            is_enabled: true,
            status: NodeStatus::Unknown,
            last_health_check: None,
            response_time_ms: None,
        }
    }

    #[test]
    fn test_new_node_validation() {
        let mut input = NewNode {
            hostname: "cp1".to_string(),
            ip: "10.0.0.5".to_string(),
            port: 8443,
            priority: 10,
        };
        assert!(input.validate().is_ok());

        input.hostname = "  ".to_string();
        assert!(matches!(input.validate(), Err(ControlPlaneError::Validation(_))));

        input.hostname = "cp1".to_string();
        input.ip = String::new();
        assert!(matches!(input.validate(), Err(ControlPlaneError::Validation(_))));

        input.ip = "not-an-ip".to_string();
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_registry_order() {
        let mut nodes = vec![node(3, 20), node(2, 10), node(1, 20)];
        nodes.sort_by(registry_order);
        let ids: Vec<u64> = nodes.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_eligibility() {
        let mut n = node(1, 10);
        assert!(!n.is_eligible());
        n.status = NodeStatus::Healthy;
        assert!(n.is_eligible());
        n.is_enabled = false;
        assert!(!n.is_eligible());
    }

    #[test]
    fn test_base_url() {
        let mut n = node(1, 10);
        assert_eq!(n.base_url(), "http://10.0.0.1:8443");
        n.ip = "::1".to_string();
        assert_eq!(n.base_url(), "http://[::1]:8443");
    }

    #[test]
    fn test_failover_reason_serde() {
        let json = serde_json::to_string(&FailoverReason::HealthTriggered).unwrap();
        assert_eq!(json, "\"health-triggered\"");
        assert_eq!("manual".parse::<FailoverReason>().unwrap(), FailoverReason::Manual);
    }

    #[test]
    fn test_profile_debug_redacts_password() {
        let profile = ServerProfile {
            host: "db1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: "hunter2".to_string(),
            database: None,
        };
        assert!(!format!("{:?}", profile).contains("hunter2"));
    }
}
