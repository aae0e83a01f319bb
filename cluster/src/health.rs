use crate::registry::NodeRegistry;
use crate::state::ClusterState;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use hostplane_common::types::*;
use hostplane_common::{ControlPlaneError, Result};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one liveness probe
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub elapsed: Duration,
    pub detail: Option<String>,
}

/// Liveness probe against a node's control endpoint
///
/// Implementations never retry; a failed probe is simply unhealthy until the
/// next scheduled sweep.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, node: &ClusterNode) -> ProbeOutcome;
}

/// HTTP probe: `GET <path>` must answer with a 2xx status within the timeout
pub struct HttpProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpProbe {
    pub fn new(timeout: Duration, path: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ControlPlaneError::Internal(format!("failed to build probe client: {}", e)))?;

        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Ok(Self { client, path })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, node: &ClusterNode) -> ProbeOutcome {
        let url = format!("{}{}", node.base_url(), self.path);
        let start = Instant::now();

        let (healthy, detail) = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => (true, None),
            Ok(response) => (false, Some(format!("HTTP {}", response.status()))),
            Err(e) if e.is_timeout() => (false, Some("probe timed out".to_string())),
            Err(e) if e.is_connect() => (false, Some(format!("connection failed: {}", e))),
            Err(e) => (false, Some(e.to_string())),
        };

        ProbeOutcome {
            healthy,
            elapsed: start.elapsed(),
            detail,
        }
    }
}

/// Health monitor - probes registered nodes and records their status
pub struct HealthMonitor {
    registry: NodeRegistry,
    probe: Arc<dyn HealthProbe>,
    max_concurrency: usize,
}

impl HealthMonitor {
    pub fn new(registry: NodeRegistry, probe: Arc<dyn HealthProbe>, max_concurrency: usize) -> Self {
        Self {
            registry,
            probe,
            max_concurrency: max_concurrency.max(1),
        }
    }

    async fn probe_node(&self, node: &ClusterNode) -> HealthRecord {
        let outcome = self.probe.probe(node).await;
        let status = if outcome.healthy {
            NodeStatus::Healthy
        } else {
            NodeStatus::Unhealthy
        };
        let response_time_ms = outcome.elapsed.as_millis() as u64;

        counter!("hostplane.health.probes", "result" => status.as_str()).increment(1);
        histogram!("hostplane.health.probe_latency_ms").record(response_time_ms as f64);

        match (node.status, status) {
            (NodeStatus::Healthy, NodeStatus::Unhealthy) => warn!(
                "Node became unhealthy: node_id={}, hostname={}, reason={}",
                node.id,
                node.hostname,
                outcome.detail.as_deref().unwrap_or("unknown")
            ),
            (NodeStatus::Unhealthy, NodeStatus::Healthy) => {
                info!("Node recovered: node_id={}, hostname={}", node.id, node.hostname)
            }
            _ => debug!(
                "Health check: node_id={}, status={}, latency_ms={}",
                node.id, status, response_time_ms
            ),
        }

        HealthRecord {
            node_id: node.id,
            status,
            response_time_ms,
            checked_at: Utc::now(),
        }
    }

    /// Probe one node, persist the result and report whether it is healthy
    pub async fn check_health(&self, node: &ClusterNode) -> Result<bool> {
        let record = self.probe_node(node).await;
        let healthy = record.status == NodeStatus::Healthy;
        self.registry.store().record_health(&[record]).await?;
        Ok(healthy)
    }

    /// Probe every registered node
    pub async fn run_health_sweep(&self) -> Result<ClusterState> {
        let state = self.registry.load_state().await?;
        self.sweep(state.nodes).await
    }

    /// Probe `nodes` concurrently, persist the results and return the refreshed state
    pub async fn sweep(&self, nodes: Vec<ClusterNode>) -> Result<ClusterState> {
        let started = Instant::now();
        let records: Vec<HealthRecord> = stream::iter(nodes)
            .map(|node| async move { self.probe_node(&node).await })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        self.registry.store().record_health(&records).await?;

        let healthy = records.iter().filter(|r| r.status == NodeStatus::Healthy).count();
        info!(
            "Health sweep complete: probed={}, healthy={}, elapsed_ms={}",
            records.len(),
            healthy,
            started.elapsed().as_millis()
        );

        self.registry.load_state().await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// Probe answering from a fixed table; unknown nodes are unhealthy
    #[derive(Default)]
    pub struct ScriptedProbe {
        healthy: Mutex<HashSet<NodeId>>,
        pub calls: Mutex<HashMap<NodeId, usize>>,
    }

    impl ScriptedProbe {
        pub fn set(&self, id: NodeId, healthy: bool) {
            let mut set = self.healthy.lock();
            if healthy {
                set.insert(id);
            } else {
                set.remove(&id);
            }
        }

        pub fn calls_for(&self, id: NodeId) -> usize {
            self.calls.lock().get(&id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, node: &ClusterNode) -> ProbeOutcome {
            *self.calls.lock().entry(node.id).or_default() += 1;
            ProbeOutcome {
                healthy: self.healthy.lock().contains(&node.id),
                elapsed: Duration::from_millis(1),
                detail: None,
            }
        }
    }
}
