use crate::auth;
use crate::error::{ApiError, ApiResponse};
use crate::health;
use crate::proxy;
use crate::state::AppState;
use axum::{
    extract::{FromRequest, FromRequestParts, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{any, get, post},
    Router,
};
use hostplane_cluster::{ElectionOutcome, LoadBalancerStats};
use hostplane_common::types::*;
use hostplane_common::ControlPlaneError;
use hostplane_replication::{MasterStatus, Promotion, ReplicaSetup, ReplicationOrchestrator, TopologyStatus};
use hostplane_storage::SessionStats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Default page size of the failover history
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// JSON body extractor answering malformed input with the error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

/// Aggregate cluster view
#[derive(Serialize, Debug)]
pub struct ClusterStatus {
    pub nodes: Vec<ClusterNode>,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub current_primary: Option<ClusterNode>,
    pub election_strategy: &'static str,
    /// Host of the database master; a full failover moves both primaries
    pub database_master: Option<String>,
    pub replication: Option<TopologyStatus>,
    pub load_balancer: LoadBalancerStats,
}

#[derive(Deserialize, Debug)]
pub struct FailoverRequest {
    #[serde(alias = "targetNodeId")]
    pub target_node_id: NodeId,
}

#[derive(Serialize, Debug)]
pub struct FailoverResponse {
    pub primary: NodeId,
    /// False when the target already was primary
    pub changed: bool,
    pub event: Option<FailoverEvent>,
}

#[derive(Deserialize, Debug)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize, Debug)]
pub struct PromoteRequest {
    #[serde(alias = "slaveHost", alias = "host")]
    pub slave_host: String,
}

#[derive(Serialize, Debug)]
pub struct RemovedNode {
    pub removed: NodeId,
}

#[derive(Serialize, Debug)]
pub struct ReloadResponse {
    pub healthy_nodes: usize,
}

#[derive(Serialize, Debug)]
pub struct CleanupResponse {
    pub removed: u64,
}

fn orchestrator(state: &AppState) -> Result<&Arc<ReplicationOrchestrator>, ApiError> {
    state.replication.as_ref().ok_or_else(|| {
        ApiError::ControlPlane(ControlPlaneError::ServiceUnavailable(
            "replication is not configured".to_string(),
        ))
    })
}

/// Refresh the load balancer after a membership or health change
async fn refresh_balancer(state: &AppState) {
    if let Err(e) = state.balancer.reload().await {
        warn!("Load balancer reload failed: {}", e);
    }
}

// ==================== Cluster Handlers ====================

#[instrument(skip(state))]
async fn cluster_status(State(state): State<AppState>) -> ApiResult<ClusterStatus> {
    let cluster = state.registry.load_state().await?;
    let (database_master, replication) = match &state.replication {
        Some(orchestrator) => {
            let status = orchestrator.check_topology_status().await;
            (Some(status.master.clone()), Some(status))
        }
        None => (None, None),
    };

    ok(ClusterStatus {
        total_nodes: cluster.nodes.len(),
        healthy_nodes: cluster.healthy_count(),
        current_primary: cluster.primary().cloned(),
        election_strategy: state.controller.strategy_name(),
        database_master,
        replication,
        load_balancer: state.balancer.stats(),
        nodes: cluster.nodes,
    })
}

#[instrument(skip(state))]
async fn list_nodes(State(state): State<AppState>) -> ApiResult<Vec<ClusterNode>> {
    ok(state.registry.list_nodes().await?)
}

#[instrument(skip(state))]
async fn add_node(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<NewNode>,
) -> Result<(StatusCode, Json<ApiResponse<ClusterNode>>), ApiError> {
    let node = state.registry.add_node(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(node))))
}

#[instrument(skip(state))]
async fn remove_node(State(state): State<AppState>, ApiPath(id): ApiPath<NodeId>) -> ApiResult<RemovedNode> {
    state.registry.remove_node(id).await?;
    refresh_balancer(&state).await;
    ok(RemovedNode { removed: id })
}

#[instrument(skip(state))]
async fn update_node(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<NodeId>,
    ApiJson(update): ApiJson<NodeUpdate>,
) -> ApiResult<ClusterNode> {
    let node = state.registry.update_node(id, update).await?;
    refresh_balancer(&state).await;
    ok(node)
}

#[instrument(skip(state))]
async fn sweep_nodes(State(state): State<AppState>) -> ApiResult<Vec<ClusterNode>> {
    let cluster = state.monitor.run_health_sweep().await?;
    refresh_balancer(&state).await;
    ok(cluster.nodes)
}

#[instrument(skip(state))]
async fn elect_primary(State(state): State<AppState>) -> ApiResult<ElectionOutcome> {
    let outcome = state.controller.elect_primary().await?;
    refresh_balancer(&state).await;
    ok(outcome)
}

#[instrument(skip(state))]
async fn manual_failover(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<FailoverRequest>,
) -> ApiResult<FailoverResponse> {
    let target = request.target_node_id;
    info!("Manual failover requested: target={}", target);

    let event = state.controller.manual_failover(target).await?;
    refresh_balancer(&state).await;
    ok(FailoverResponse {
        primary: target,
        changed: event.is_some(),
        event,
    })
}

#[instrument(skip(state))]
async fn failover_history(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ApiResult<Vec<FailoverEventView>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    ok(state.controller.get_failover_history(limit).await?)
}

// ==================== Database Handlers ====================

#[instrument(skip(state))]
async fn replication_status(State(state): State<AppState>) -> ApiResult<TopologyStatus> {
    ok(orchestrator(&state)?.check_topology_status().await)
}

#[instrument(skip(state))]
async fn promote_replica(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PromoteRequest>,
) -> ApiResult<Promotion> {
    ok(orchestrator(&state)?.promote_replica(&request.slave_host).await?)
}

#[instrument(skip(state))]
async fn configure_master(State(state): State<AppState>) -> ApiResult<MasterStatus> {
    ok(orchestrator(&state)?.configure_master().await?)
}

#[instrument(skip(state))]
async fn configure_replica(
    State(state): State<AppState>,
    ApiPath(host): ApiPath<String>,
) -> ApiResult<ReplicaSetup> {
    ok(orchestrator(&state)?.configure_replica_host(&host).await?)
}

// ==================== Load Balancer Handlers ====================

#[instrument(skip(state))]
async fn balancer_stats(State(state): State<AppState>) -> ApiResult<LoadBalancerStats> {
    ok(state.balancer.stats())
}

#[instrument(skip(state))]
async fn balancer_reload(State(state): State<AppState>) -> ApiResult<ReloadResponse> {
    let healthy_nodes = state.balancer.reload().await?;
    ok(ReloadResponse { healthy_nodes })
}

// ==================== Session Handlers ====================

#[instrument(skip(state))]
async fn session_stats(State(state): State<AppState>) -> ApiResult<SessionStats> {
    ok(state.sessions.stats().await?)
}

#[instrument(skip(state))]
async fn session_cleanup(State(state): State<AppState>) -> ApiResult<CleanupResponse> {
    let removed = state.sessions.cleanup_expired().await?;
    ok(CleanupResponse { removed })
}

/// Prometheus scrape endpoint
async fn metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or_else(|| ApiError::NotFound("metrics recorder is not installed".to_string()))
}

/// Create REST API router
pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/status", get(cluster_status))
        // Node registry
        .route("/nodes", get(list_nodes).post(add_node))
        .route("/nodes/health", post(sweep_nodes))
        .route("/nodes/:id", axum::routing::delete(remove_node).patch(update_node))
        // Election and failover
        .route("/election", post(elect_primary))
        .route("/failover", post(manual_failover))
        .route("/failover/history", get(failover_history))
        // Replication
        .route("/database/replication", get(replication_status))
        .route("/database/promote", post(promote_replica))
        .route("/database/master", post(configure_master))
        .route("/database/replicas/:host", post(configure_replica))
        // Load balancer
        .route("/loadbalancer/stats", get(balancer_stats))
        .route("/loadbalancer/reload", post(balancer_reload))
        // Sessions
        .route("/sessions/stats", get(session_stats))
        .route("/sessions/cleanup", post(session_cleanup))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .route("/", get(health::liveness))
        .route("/metrics", get(metrics))
        .route("/lb", any(proxy::forward))
        .route("/lb/*path", any(proxy::forward))
        .merge(admin)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
