use crate::registry::NodeRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hostplane_common::types::*;
use hostplane_common::{ControlPlaneError, Result};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Headers that only make sense on a single hop
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Node selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastConnections,
    WeightedRandom,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastConnections => "least_connections",
            Strategy::WeightedRandom => "weighted_random",
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Ok(Strategy::RoundRobin),
            "least_connections" | "leastconn" => Ok(Strategy::LeastConnections),
            "weighted_random" | "weighted" => Ok(Strategy::WeightedRandom),
            other => Err(ControlPlaneError::validation(format!(
                "unknown load-balancing strategy '{}'",
                other
            ))),
        }
    }
}

/// Selection weight of a node: `100 - priority`, at least 1
pub fn node_weight(node: &ClusterNode) -> u64 {
    (100i64 - node.priority as i64).max(1) as u64
}

/// Cumulative-weight scan for a draw in `[0, total_weight)`
pub fn pick_weighted(nodes: &[ClusterNode], point: u64) -> Option<&ClusterNode> {
    let mut cumulative = 0u64;
    for node in nodes {
        cumulative += node_weight(node);
        if point < cumulative {
            return Some(node);
        }
    }
    nodes.last()
}

/// An inbound request to forward to one node
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: String,
    /// Path plus optional query string, starting with `/`
    pub path_and_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Response of the node that served a dispatched request
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub node_id: NodeId,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
struct NodeTraffic {
    open: AtomicUsize,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Holds one open connection on a node; released on drop, including on error paths
pub struct ConnectionGuard {
    traffic: Arc<NodeTraffic>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.traffic.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-node traffic counters
#[derive(Debug, Clone, Serialize)]
pub struct NodeTrafficStats {
    pub node_id: NodeId,
    pub hostname: String,
    pub weight: u64,
    pub open_connections: usize,
    pub dispatched: u64,
    pub failed: u64,
}

/// Load balancer statistics
#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerStats {
    pub default_strategy: Strategy,
    pub healthy_nodes: usize,
    pub total_dispatched: u64,
    pub total_failed: u64,
    pub last_reload: Option<DateTime<Utc>>,
    pub nodes: Vec<NodeTrafficStats>,
}

/// Load balancer over the healthy, enabled subset of the registry
///
/// Connection counters are process-local: several balancer processes each see
/// only their own traffic, so least-connections is a local approximation.
pub struct LoadBalancer {
    registry: NodeRegistry,
    client: reqwest::Client,
    default_strategy: Strategy,
    working_set: RwLock<Arc<Vec<ClusterNode>>>,
    cursor: AtomicUsize,
    traffic: DashMap<NodeId, Arc<NodeTraffic>>,
    total_dispatched: AtomicU64,
    total_failed: AtomicU64,
    last_reload: RwLock<Option<DateTime<Utc>>>,
}

impl LoadBalancer {
    pub fn new(registry: NodeRegistry, default_strategy: Strategy, dispatch_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(dispatch_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ControlPlaneError::Internal(format!("failed to build proxy client: {}", e)))?;

        Ok(Self {
            registry,
            client,
            default_strategy,
            working_set: RwLock::new(Arc::new(Vec::new())),
            cursor: AtomicUsize::new(0),
            traffic: DashMap::new(),
            total_dispatched: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            last_reload: RwLock::new(None),
        })
    }

    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy
    }

    /// Re-read the healthy, enabled set from the registry
    pub async fn reload(&self) -> Result<usize> {
        let eligible: Vec<ClusterNode> = self
            .registry
            .list_nodes()
            .await?
            .into_iter()
            .filter(|n| n.is_eligible())
            .collect();

        let count = eligible.len();
        // Idle counters of nodes that left the working set are dropped
        self.traffic
            .retain(|id, t| eligible.iter().any(|n| n.id == *id) || t.open.load(Ordering::SeqCst) > 0);
        *self.working_set.write() = Arc::new(eligible);
        *self.last_reload.write() = Some(Utc::now());
        gauge!("hostplane.lb.healthy_nodes").set(count as f64);

        debug!("Load balancer reloaded: healthy_nodes={}", count);
        Ok(count)
    }

    /// The working set as of now; later reloads do not affect it
    pub fn snapshot(&self) -> Arc<Vec<ClusterNode>> {
        self.working_set.read().clone()
    }

    pub fn select(&self, strategy: Strategy) -> Option<ClusterNode> {
        self.select_from(&self.snapshot(), strategy)
    }

    fn select_from(&self, nodes: &[ClusterNode], strategy: Strategy) -> Option<ClusterNode> {
        if nodes.is_empty() {
            return None;
        }

        match strategy {
            Strategy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::SeqCst) % nodes.len();
                Some(nodes[index].clone())
            }
            Strategy::LeastConnections => nodes
                .iter()
                .min_by_key(|n| self.open_connections(n.id))
                .cloned(),
            Strategy::WeightedRandom => {
                let total: u64 = nodes.iter().map(node_weight).sum();
                let point = rand::thread_rng().gen_range(0..total);
                pick_weighted(nodes, point).cloned()
            }
        }
    }

    /// Nodes with traffic counters currently held
    pub fn tracked_nodes(&self) -> usize {
        self.traffic.len()
    }

    pub fn open_connections(&self, id: NodeId) -> usize {
        self.traffic
            .get(&id)
            .map(|t| t.open.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn traffic_for(&self, id: NodeId) -> Arc<NodeTraffic> {
        self.traffic.entry(id).or_default().value().clone()
    }

    /// Count an open connection on `node` until the guard is dropped
    pub fn acquire(&self, node: &ClusterNode) -> ConnectionGuard {
        let traffic = self.traffic_for(node.id);
        traffic.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard { traffic }
    }

    /// Forward `request` to one healthy node chosen by `strategy`
    ///
    /// No retry against another node: a downstream connection failure is
    /// reported as `BadGateway` and retrying is up to the caller.
    pub async fn dispatch(&self, request: ProxyRequest, strategy: Strategy) -> Result<ProxyResponse> {
        let snapshot = self.snapshot();
        let node = self.select_from(&snapshot, strategy).ok_or_else(|| {
            warn!("Dispatch rejected: no healthy backend");
            ControlPlaneError::ServiceUnavailable("no healthy backend".to_string())
        })?;

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ControlPlaneError::validation(format!("invalid method '{}'", request.method)))?;
        let url = format!("{}{}", node.base_url(), request.path_and_query);

        let _guard = self.acquire(&node);
        let traffic = self.traffic_for(node.id);
        traffic.dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_dispatched.fetch_add(1, Ordering::Relaxed);
        counter!("hostplane.lb.dispatches", "strategy" => strategy.as_str()).increment(1);

        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            if !HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let result = async {
            let response = builder.body(request.body).send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter(|(name, _)| !HOP_BY_HOP_HEADERS.contains(&name.as_str()))
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.bytes().await?.to_vec();
            Ok::<_, reqwest::Error>((status, headers, body))
        }
        .await;

        match result {
            Ok((status, headers, body)) => {
                debug!(
                    "Dispatched {} {} to node_id={} status={}",
                    request.method, request.path_and_query, node.id, status
                );
                Ok(ProxyResponse {
                    node_id: node.id,
                    status,
                    headers,
                    body,
                })
            }
            Err(e) => {
                traffic.failed.fetch_add(1, Ordering::Relaxed);
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                counter!("hostplane.lb.failures").increment(1);
                error!("Dispatch to node_id={} ({}) failed: {}", node.id, node.hostname, e);
                Err(ControlPlaneError::BadGateway(format!(
                    "node {} ({}) failed: {}",
                    node.id, node.hostname, e
                )))
            }
        }
    }

    pub fn stats(&self) -> LoadBalancerStats {
        let snapshot = self.snapshot();
        let nodes = snapshot
            .iter()
            .map(|node| {
                let (open, dispatched, failed) = self
                    .traffic
                    .get(&node.id)
                    .map(|t| {
                        (
                            t.open.load(Ordering::SeqCst),
                            t.dispatched.load(Ordering::Relaxed),
                            t.failed.load(Ordering::Relaxed),
                        )
                    })
                    .unwrap_or((0, 0, 0));
                NodeTrafficStats {
                    node_id: node.id,
                    hostname: node.hostname.clone(),
                    weight: node_weight(node),
                    open_connections: open,
                    dispatched,
                    failed,
                }
            })
            .collect();

        LoadBalancerStats {
            default_strategy: self.default_strategy,
            healthy_nodes: snapshot.len(),
            total_dispatched: self.total_dispatched.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            last_reload: *self.last_reload.read(),
            nodes,
        }
    }

    /// Periodically refresh the working set until cancelled
    pub async fn run_refresh(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!("Starting load balancer refresh: interval={:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.reload().await {
                error!("Load balancer reload failed: {}", e);
            }
        }
        info!("Load balancer refresh stopped");
    }
}
