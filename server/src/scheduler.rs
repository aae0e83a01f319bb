use crate::config::Settings;
use crate::state::AppState;
use hostplane_storage::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Start the background loops; all of them stop when `shutdown` is cancelled
pub fn spawn_background(state: &AppState, settings: &Settings, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let cluster = settings.cluster_config();
    vec![
        tokio::spawn(state.controller.clone().run(cluster.health_check_interval, shutdown.clone())),
        tokio::spawn(state.balancer.clone().run_refresh(
            Duration::from_secs(settings.load_balancer.refresh_interval_secs),
            shutdown.clone(),
        )),
        tokio::spawn(run_session_cleanup(
            state.sessions.clone(),
            Duration::from_secs(settings.sessions.cleanup_interval_secs),
            shutdown,
        )),
    ]
}

/// Periodically delete expired sessions
pub async fn run_session_cleanup(sessions: Arc<SessionStore>, interval: Duration, shutdown: CancellationToken) {
    info!("Starting session cleanup: interval={:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = sessions.cleanup_expired().await {
            error!("Session cleanup failed: {}", e);
        }
    }
    info!("Session cleanup stopped");
}
