pub mod balancer;
pub mod election;
pub mod failover;
pub mod health;
pub mod registry;
pub mod state;

pub use balancer::{LoadBalancer, LoadBalancerStats, ProxyRequest, ProxyResponse, Strategy};
pub use election::{ElectionStrategy, PriorityElection};
pub use failover::{ElectionOutcome, FailoverController};
pub use health::{HealthMonitor, HealthProbe, HttpProbe, ProbeOutcome};
pub use registry::NodeRegistry;
pub use state::ClusterState;

use std::time::Duration;

/// Cluster configuration
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Interval between health sweeps
    pub health_check_interval: Duration,

    /// Timeout of a single liveness probe
    pub probe_timeout: Duration,

    /// Maximum probes in flight during one sweep
    pub max_concurrent_probes: usize,

    /// Path of the liveness endpoint on every node
    pub probe_path: String,

    /// Fail over automatically when the primary turns unhealthy
    pub auto_failover: bool,

    /// Timeout of a proxied load-balancer request
    pub dispatch_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            max_concurrent_probes: 8,
            probe_path: "/".to_string(),
            auto_failover: true,
            dispatch_timeout: Duration::from_secs(30),
        }
    }
}
