use anyhow::Context;
use clap::Parser;
use hostplane_cluster::HttpProbe;
use hostplane_replication::MySqlBackend;
use hostplane_server::config::{Settings, StorageBackend};
use hostplane_server::{create_router, scheduler, AppState};
use hostplane_storage::Stores;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hostplane-server", version, about = "Hosting control-plane server")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "hostplane.yaml")]
    config: PathBuf,

    /// Override server.bind
    #[arg(long)]
    bind: Option<String>,

    /// Override log_level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config, cli.bind.as_deref(), cli.log_level.as_deref())
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hostplane-server v{}", env!("CARGO_PKG_VERSION"));

    let stores = match settings.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; cluster state is not shared between nodes");
            Stores::in_memory()
        }
        StorageBackend::Mysql => {
            let url = settings.storage.url.as_deref().context("storage.url is required")?;
            Stores::mysql(url, settings.storage.max_connections)
                .await
                .context("failed to open the cluster datastore")?
        }
    };

    let cluster = settings.cluster_config();
    let probe = Arc::new(HttpProbe::new(cluster.probe_timeout, cluster.probe_path.clone())?);
    let replication_backend = Arc::new(MySqlBackend::new(Duration::from_secs(
        settings.replication.command_timeout_secs,
    )));
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let state = AppState::assemble(&settings, stores, probe, replication_backend)?.with_metrics(metrics);
    if state.replication.is_none() {
        info!("No replication master configured; database endpoints are disabled");
    }
    if let Err(e) = state.balancer.reload().await {
        warn!("Initial load balancer reload failed: {}", e);
    }

    let shutdown = CancellationToken::new();
    let tasks = scheduler::spawn_background(&state, &settings, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.bind))?;
    info!("Admin API listening on {}", settings.server.bind);

    let signal = shutdown.clone();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
    info!("hostplane-server stopped");
    Ok(())
}
