use crate::balancer::LoadBalancer;
use crate::election::ElectionStrategy;
use crate::health::HealthMonitor;
use crate::registry::NodeRegistry;
use hostplane_common::types::*;
use hostplane_common::{ControlPlaneError, Result};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Upper bound for history queries
pub const MAX_HISTORY_LIMIT: usize = 500;

/// Result of an election round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ElectionOutcome {
    /// The current primary is healthy and keeps its role
    Retained { primary: NodeId },
    /// A primary was (re-)assigned
    Elected {
        previous: Option<NodeId>,
        primary: NodeId,
    },
}

impl ElectionOutcome {
    pub fn primary(&self) -> NodeId {
        match self {
            ElectionOutcome::Retained { primary } | ElectionOutcome::Elected { primary, .. } => *primary,
        }
    }
}

/// Election and failover controller
///
/// Cluster states: no primary, primary elected, primary unhealthy. Decisions
/// are taken from a fresh registry snapshot and written back with a single
/// `set_primary`, so the datastore serializes competing controllers.
pub struct FailoverController {
    registry: NodeRegistry,
    monitor: Arc<HealthMonitor>,
    strategy: Box<dyn ElectionStrategy>,
    auto_failover: bool,
    balancer: Option<Arc<LoadBalancer>>,
    // Serializes elections issued from this process
    election_lock: Mutex<()>,
}

impl FailoverController {
    pub fn new(
        registry: NodeRegistry,
        monitor: Arc<HealthMonitor>,
        strategy: Box<dyn ElectionStrategy>,
        auto_failover: bool,
    ) -> Self {
        Self {
            registry,
            monitor,
            strategy,
            auto_failover,
            balancer: None,
            election_lock: Mutex::new(()),
        }
    }

    /// Reload `balancer` after every monitoring cycle
    pub fn with_load_balancer(mut self, balancer: Arc<LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Keep a healthy primary, otherwise sweep enabled nodes and elect one
    ///
    /// Replacing a primary that is unhealthy, or that was deposed by an
    /// earlier election finding no healthy node, records a health-triggered
    /// failover event.
    pub async fn elect_primary(&self) -> Result<ElectionOutcome> {
        let _guard = self.election_lock.lock().await;
        self.elect_locked().await.map(|(outcome, _)| outcome)
    }

    async fn elect_locked(&self) -> Result<(ElectionOutcome, Option<FailoverEvent>)> {
        let state = self.registry.load_state().await?;

        let previous = match state.primary() {
            Some(primary) if primary.is_eligible() => {
                return Ok((ElectionOutcome::Retained { primary: primary.id }, None));
            }
            Some(primary) => Some(primary.id),
            None => self.registry.store().deposed_primary().await?,
        };

        let swept = self.monitor.sweep(state.enabled_nodes()).await?;
        let candidates = swept.eligible_nodes();

        let Some(primary) = self.strategy.select(&candidates) else {
            self.registry.store().clear_primary().await?;
            error!(
                "Election failed: no healthy enabled nodes among {} registered; cluster has no primary",
                swept.nodes.len()
            );
            return Err(ControlPlaneError::NoHealthyNodes);
        };

        self.registry.store().set_primary(primary).await?;
        info!(
            "Elected primary: node_id={}, previous={:?}, candidates={}, strategy={}",
            primary,
            previous,
            candidates.len(),
            self.strategy.name()
        );

        let event = match previous {
            Some(old_primary) if old_primary != primary => {
                let event = self
                    .registry
                    .store()
                    .append_failover_event(Some(old_primary), primary, FailoverReason::HealthTriggered)
                    .await?;
                counter!("hostplane.failovers", "reason" => FailoverReason::HealthTriggered.as_str()).increment(1);
                warn!("Failover complete: old_primary={}, new_primary={}", old_primary, primary);
                Some(event)
            }
            Some(old_primary) => {
                info!("Primary recovered during election: node_id={}", old_primary);
                None
            }
            None => None,
        };

        Ok((ElectionOutcome::Elected { previous, primary }, event))
    }

    /// Automatic failover check
    ///
    /// Fails over when the current primary's last status is not healthy, or
    /// when the cluster has no primary. An initial election, with no primary
    /// ever assigned, is not recorded as a failover. Returns the recorded
    /// event, if any.
    pub async fn failover(&self) -> Result<Option<FailoverEvent>> {
        let _guard = self.election_lock.lock().await;

        let state = self.registry.load_state().await?;
        match state.primary() {
            Some(primary) if primary.is_healthy() => return Ok(None),
            Some(primary) => warn!(
                "Primary unhealthy, starting failover: node_id={}, hostname={}, status={}",
                primary.id, primary.hostname, primary.status
            ),
            None => info!("No primary assigned, running election"),
        }

        let (_, event) = self.elect_locked().await?;
        Ok(event)
    }

    /// Force primary onto `target` regardless of priority
    ///
    /// The target must be enabled and pass a fresh health check. Returns
    /// `None` when the target already is primary.
    pub async fn manual_failover(&self, target: NodeId) -> Result<Option<FailoverEvent>> {
        let _guard = self.election_lock.lock().await;

        let state = self.registry.load_state().await?;
        let node = state
            .get_node(target)
            .cloned()
            .ok_or(ControlPlaneError::NodeNotFound(target))?;

        if !node.is_enabled {
            return Err(ControlPlaneError::validation(format!(
                "node {} is disabled and cannot become primary",
                target
            )));
        }

        if !self.monitor.check_health(&node).await? {
            warn!("Manual failover rejected: target node_id={} failed its health check", target);
            return Err(ControlPlaneError::TargetUnhealthy(target));
        }

        let old_primary = match state.primary() {
            Some(primary) if primary.id == target => {
                info!("Manual failover: node_id={} already primary", target);
                return Ok(None);
            }
            Some(primary) => Some(primary.id),
            None => self
                .registry
                .store()
                .deposed_primary()
                .await?
                .filter(|id| *id != target),
        };

        self.registry.store().set_primary(target).await?;
        let event = self
            .registry
            .store()
            .append_failover_event(old_primary, target, FailoverReason::Manual)
            .await?;
        counter!("hostplane.failovers", "reason" => FailoverReason::Manual.as_str()).increment(1);
        info!(
            "Manual failover complete: old_primary={:?}, new_primary={}",
            old_primary, target
        );
        Ok(Some(event))
    }

    /// Failover events newest first
    pub async fn get_failover_history(&self, limit: usize) -> Result<Vec<FailoverEventView>> {
        self.registry
            .store()
            .failover_history(limit.clamp(1, MAX_HISTORY_LIMIT))
            .await
    }

    /// Periodic health sweep followed by the failover check, until cancelled
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(
            "Starting health monitor: interval={:?}, auto_failover={}",
            interval, self.auto_failover
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.run_cycle().await;
        }

        info!("Health monitor stopped");
    }

    /// One monitoring round: sweep, failover check, then balancer reload
    pub async fn run_cycle(&self) {
        if let Err(e) = self.monitor.run_health_sweep().await {
            error!("Health sweep failed: {}", e);
            return;
        }

        if self.auto_failover {
            match self.failover().await {
                Ok(_) => {}
                Err(ControlPlaneError::NoHealthyNodes) => {
                    error!("No healthy control-plane node can be primary");
                }
                Err(e) => error!("Failover check failed: {}", e),
            }
        }

        if let Some(balancer) = &self.balancer {
            if let Err(e) = balancer.reload().await {
                error!("Load balancer reload after health sweep failed: {}", e);
            }
        }
    }
}
