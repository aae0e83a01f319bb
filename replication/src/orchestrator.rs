use crate::backend::{MasterStatus, ReplicaStatus, ReplicationBackend};
use crate::sql::{self, Statement};
use futures::future::join_all;
use hostplane_common::types::ServerProfile;
use hostplane_common::{ControlPlaneError, Result};
use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Configured master plus ordered replicas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationTopology {
    pub master: ServerProfile,
    #[serde(default)]
    pub replicas: Vec<ServerProfile>,
}

/// Credential replicas use to stream from the master
#[derive(Clone)]
pub struct ReplicationCredential {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ReplicationCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationCredential")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Result of pointing a replica at the master
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaSetup {
    pub host: String,
    pub snapshot: MasterStatus,
    pub io_running: bool,
    pub sql_running: bool,
}

/// Observed health of one replica
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaHealth {
    pub host: String,
    pub port: u16,
    pub io_running: bool,
    pub sql_running: bool,
    pub seconds_behind_master: Option<u64>,
    pub last_error: Option<String>,
}

impl ReplicaHealth {
    pub fn is_healthy(&self) -> bool {
        self.io_running && self.sql_running
    }
}

/// Topology health, recomputed on every query
#[derive(Debug, Clone, Serialize)]
pub struct TopologyStatus {
    pub healthy: bool,
    pub master: String,
    pub replicas: Vec<ReplicaHealth>,
    /// Hosts with at least one replication thread stopped
    pub degraded: Vec<String>,
}

/// Outcome of promoting a replica to master
#[derive(Debug, Clone, Serialize)]
pub struct Promotion {
    pub new_master: String,
    pub previous_master: String,
    pub remaining_replicas: Vec<String>,
}

/// Configures and supervises master/replica replication
///
/// Topology changes hold an async lock for their whole duration, so two
/// configuration or promotion calls never interleave against the same
/// topology. Steps run one at a time and stop at the first failure; earlier
/// steps are not rolled back.
pub struct ReplicationOrchestrator {
    backend: Arc<dyn ReplicationBackend>,
    credential: ReplicationCredential,
    topology: Mutex<ReplicationTopology>,
    last_snapshot: RwLock<Option<MasterStatus>>,
}

impl ReplicationOrchestrator {
    pub fn new(
        backend: Arc<dyn ReplicationBackend>,
        topology: ReplicationTopology,
        credential: ReplicationCredential,
    ) -> Self {
        Self {
            backend,
            credential,
            topology: Mutex::new(topology),
            last_snapshot: RwLock::new(None),
        }
    }

    pub async fn topology(&self) -> ReplicationTopology {
        self.topology.lock().await.clone()
    }

    pub async fn master_host(&self) -> String {
        self.topology.lock().await.master.host.clone()
    }

    /// Latest coordinates returned by `configure_master`
    pub fn last_snapshot(&self) -> Option<MasterStatus> {
        self.last_snapshot.read().clone()
    }

    async fn run(&self, server: &ServerProfile, statement: &Statement) -> Result<()> {
        match self.backend.execute(server, &statement.sql).await {
            Ok(()) => {
                info!("Replication step ok: host={}, command={}", server.host, statement.redacted());
                Ok(())
            }
            Err(e) => {
                error!(
                    "Replication step failed: host={}, command={}, error={}",
                    server.host,
                    statement.redacted(),
                    e
                );
                counter!("hostplane.replication.errors").increment(1);
                Err(ControlPlaneError::Replication {
                    host: server.host.clone(),
                    command: statement.redacted().to_string(),
                    message: e.0,
                })
            }
        }
    }

    async fn run_all(&self, server: &ServerProfile, statements: &[Statement]) -> Result<()> {
        for statement in statements {
            self.run(server, statement).await?;
        }
        Ok(())
    }

    fn master_statements(&self) -> Vec<Statement> {
        vec![
            sql::enable_row_binlog(),
            sql::create_replication_user(&self.credential.user, &self.credential.password),
            sql::grant_replication(&self.credential.user),
            sql::flush_privileges(),
        ]
    }

    async fn read_master_status(&self, master: &ServerProfile) -> Result<MasterStatus> {
        let command = "SHOW MASTER STATUS";
        let status = self.backend.master_status(master).await.map_err(|e| {
            error!("Replication step failed: host={}, command={}, error={}", master.host, command, e);
            ControlPlaneError::Replication {
                host: master.host.clone(),
                command: command.to_string(),
                message: e.0,
            }
        })?;

        status.ok_or_else(|| ControlPlaneError::Replication {
            host: master.host.clone(),
            command: command.to_string(),
            message: "binary logging is not enabled".to_string(),
        })
    }

    /// Enable row-based binlog and the replication credential on the master,
    /// then return its current log coordinates
    pub async fn configure_master(&self) -> Result<MasterStatus> {
        let topology = self.topology.lock().await;
        let master = &topology.master;
        info!("Configuring replication master: host={}", master.host);

        self.run_all(master, &self.master_statements()).await?;
        let snapshot = self.read_master_status(master).await?;
        *self.last_snapshot.write() = Some(snapshot.clone());

        info!(
            "Master configured: host={}, file={}, position={}",
            master.host, snapshot.file, snapshot.position
        );
        Ok(snapshot)
    }

    async fn configure_replica_locked(
        &self,
        topology: &ReplicationTopology,
        replica: &ServerProfile,
        snapshot: &MasterStatus,
    ) -> Result<ReplicaSetup> {
        info!(
            "Configuring replica: host={}, master={}, file={}, position={}",
            replica.host, topology.master.host, snapshot.file, snapshot.position
        );

        let statements = [
            sql::stop_replica(),
            sql::change_master_to(
                &topology.master,
                &self.credential.user,
                &self.credential.password,
                snapshot,
            ),
            sql::start_replica(),
        ];
        self.run_all(replica, &statements).await?;

        let status = self
            .backend
            .replica_status(replica)
            .await
            .map_err(|e| ControlPlaneError::Replication {
                host: replica.host.clone(),
                command: "SHOW SLAVE STATUS".to_string(),
                message: e.0,
            })?
            .unwrap_or(ReplicaStatus {
                io_running: false,
                sql_running: false,
                seconds_behind_master: None,
                last_error: None,
            });

        if !status.is_running() {
            warn!(
                "Replica threads not running after setup: host={}, io={}, sql={}, error={}",
                replica.host,
                status.io_running,
                status.sql_running,
                status.last_error.as_deref().unwrap_or("-")
            );
        }

        Ok(ReplicaSetup {
            host: replica.host.clone(),
            snapshot: snapshot.clone(),
            io_running: status.io_running,
            sql_running: status.sql_running,
        })
    }

    /// Point `replica` at the current master starting from `snapshot`
    pub async fn configure_replica(&self, replica: &ServerProfile, snapshot: &MasterStatus) -> Result<ReplicaSetup> {
        let topology = self.topology.lock().await;
        self.configure_replica_locked(&topology, replica, snapshot).await
    }

    /// Configure a replica from the topology by host, using the latest master
    /// snapshot or reading fresh coordinates when none was taken yet
    pub async fn configure_replica_host(&self, host: &str) -> Result<ReplicaSetup> {
        let topology = self.topology.lock().await;
        let replica = topology
            .replicas
            .iter()
            .find(|r| r.host == host)
            .cloned()
            .ok_or_else(|| ControlPlaneError::ReplicaNotFound(host.to_string()))?;

        let cached = self.last_snapshot();
        let snapshot = match cached {
            Some(snapshot) => snapshot,
            None => {
                let snapshot = self.read_master_status(&topology.master).await?;
                *self.last_snapshot.write() = Some(snapshot.clone());
                snapshot
            }
        };

        self.configure_replica_locked(&topology, &replica, &snapshot).await
    }

    /// Query every replica's thread state and lag
    pub async fn check_topology_status(&self) -> TopologyStatus {
        let topology = self.topology().await;

        let checks = topology.replicas.iter().map(|replica| async move {
            match self.backend.replica_status(replica).await {
                Ok(Some(status)) => ReplicaHealth {
                    host: replica.host.clone(),
                    port: replica.port,
                    io_running: status.io_running,
                    sql_running: status.sql_running,
                    seconds_behind_master: status.seconds_behind_master,
                    last_error: status.last_error,
                },
                Ok(None) => ReplicaHealth {
                    host: replica.host.clone(),
                    port: replica.port,
                    io_running: false,
                    sql_running: false,
                    seconds_behind_master: None,
                    last_error: Some("replication is not configured".to_string()),
                },
                Err(e) => ReplicaHealth {
                    host: replica.host.clone(),
                    port: replica.port,
                    io_running: false,
                    sql_running: false,
                    seconds_behind_master: None,
                    last_error: Some(e.0),
                },
            }
        });
        let replicas = join_all(checks).await;

        let degraded: Vec<String> = replicas
            .iter()
            .filter(|r| !r.is_healthy())
            .map(|r| r.host.clone())
            .collect();
        if !degraded.is_empty() {
            warn!("Replication degraded: replicas={:?}", degraded);
        }

        TopologyStatus {
            healthy: degraded.is_empty(),
            master: topology.master.host,
            replicas,
            degraded,
        }
    }

    /// Turn the replica at `host` into the master
    ///
    /// Only the database side of a failover: the control-plane primary is
    /// moved separately by the failover controller.
    pub async fn promote_replica(&self, host: &str) -> Result<Promotion> {
        let mut topology = self.topology.lock().await;
        let index = topology
            .replicas
            .iter()
            .position(|r| r.host == host)
            .ok_or_else(|| ControlPlaneError::ReplicaNotFound(host.to_string()))?;
        let candidate = topology.replicas[index].clone();

        warn!(
            "Promoting replica to master: host={}, previous_master={}",
            candidate.host, topology.master.host
        );

        let mut statements = vec![sql::stop_replica(), sql::reset_replica_all()];
        statements.extend(self.master_statements());
        statements.push(sql::disable_read_only());
        self.run_all(&candidate, &statements).await?;

        let promoted = topology.replicas.remove(index);
        let previous = std::mem::replace(&mut topology.master, promoted);
        // Coordinates of the old master are meaningless now
        *self.last_snapshot.write() = None;
        counter!("hostplane.replication.promotions").increment(1);

        info!("Replica promoted: new_master={}", topology.master.host);
        Ok(Promotion {
            new_master: topology.master.host.clone(),
            previous_master: previous.host,
            remaining_replicas: topology.replicas.iter().map(|r| r.host.clone()).collect(),
        })
    }
}
