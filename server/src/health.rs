use crate::state::AppState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Liveness payload served at `GET /`
///
/// Peers probe this endpoint; only the HTTP status decides health, the body is
/// informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub node: String,
}

#[instrument(skip(state))]
pub async fn liveness(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime().as_secs(),
        node: state.node_name.clone(),
    })
}
