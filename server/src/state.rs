use crate::auth::ApiKeyManager;
use crate::config::Settings;
use hostplane_cluster::{
    FailoverController, HealthMonitor, HealthProbe, LoadBalancer, NodeRegistry, PriorityElection,
};
use hostplane_common::Result;
use hostplane_replication::{ReplicationBackend, ReplicationOrchestrator};
use hostplane_storage::{SessionStore, Stores};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared state of the admin API and the background schedulers
#[derive(Clone)]
pub struct AppState {
    pub registry: NodeRegistry,
    pub monitor: Arc<HealthMonitor>,
    pub controller: Arc<FailoverController>,
    pub balancer: Arc<LoadBalancer>,
    /// Absent when no replication master is configured
    pub replication: Option<Arc<ReplicationOrchestrator>>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<ApiKeyManager>,
    pub metrics: Option<PrometheusHandle>,
    pub node_name: String,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the control-plane components from settings and their I/O seams
    pub fn assemble(
        settings: &Settings,
        stores: Stores,
        probe: Arc<dyn HealthProbe>,
        replication_backend: Arc<dyn ReplicationBackend>,
    ) -> Result<Self> {
        let cluster = settings.cluster_config();
        let registry = NodeRegistry::new(stores.cluster.clone());
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            probe,
            cluster.max_concurrent_probes,
        ));
        let balancer = Arc::new(LoadBalancer::new(
            registry.clone(),
            settings.load_balancer.default_strategy,
            cluster.dispatch_timeout,
        )?);
        // The health loop refreshes the balancer so demoted nodes stop receiving traffic
        let controller = Arc::new(
            FailoverController::new(
                registry.clone(),
                monitor.clone(),
                Box::new(PriorityElection),
                cluster.auto_failover,
            )
            .with_load_balancer(balancer.clone()),
        );
        let replication = settings.replication.topology().map(|topology| {
            Arc::new(ReplicationOrchestrator::new(
                replication_backend,
                topology,
                settings.replication.credential(),
            ))
        });

        Ok(Self {
            registry,
            monitor,
            controller,
            balancer,
            replication,
            sessions: Arc::new(SessionStore::new(stores.sessions, settings.sessions.ttl_secs)),
            auth: Arc::new(ApiKeyManager::from_config(&settings.auth.api_keys)),
            metrics: None,
            node_name: settings.server.node_name.clone(),
            started_at: Instant::now(),
        })
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
