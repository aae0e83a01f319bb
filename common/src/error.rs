use crate::types::NodeId;

/// Errors surfaced by the control plane
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// Bad input to a registry mutation
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The active primary cannot be removed or disabled
    #[error("Node {0} is the current primary and is protected")]
    PrimaryNodeProtected(NodeId),

    /// Election cannot produce a primary, or the load balancer has no target
    #[error("No healthy nodes available")]
    NoHealthyNodes,

    /// Manual failover target failed its own health check
    #[error("Failover target {0} failed its health check")]
    TargetUnhealthy(NodeId),

    #[error("Replication command failed on {host}: {message} (command: {command})")]
    Replication {
        host: String,
        command: String,
        message: String,
    },

    #[error("Replica not found: {0}")]
    ReplicaNotFound(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    /// Stable machine-readable error class
    pub fn kind(&self) -> &'static str {
        match self {
            ControlPlaneError::Validation(_) => "validation_error",
            ControlPlaneError::NodeNotFound(_) => "node_not_found",
            ControlPlaneError::PrimaryNodeProtected(_) => "primary_node_protected",
            ControlPlaneError::NoHealthyNodes => "no_healthy_nodes",
            ControlPlaneError::TargetUnhealthy(_) => "target_unhealthy",
            ControlPlaneError::Replication { .. } => "replication_error",
            ControlPlaneError::ReplicaNotFound(_) => "replica_not_found",
            ControlPlaneError::BadGateway(_) => "bad_gateway",
            ControlPlaneError::ServiceUnavailable(_) => "service_unavailable",
            ControlPlaneError::Storage(_) => "storage_error",
            ControlPlaneError::Config(_) => "config_error",
            ControlPlaneError::Internal(_) => "internal_error",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ControlPlaneError::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;
