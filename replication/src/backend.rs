use async_trait::async_trait;
use hostplane_common::types::ServerProfile;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Connection, Executor, Row};
use std::time::Duration;
use tracing::debug;

/// Failure reported by a database server or the connection to it
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl From<sqlx::Error> for BackendError {
    fn from(e: sqlx::Error) -> Self {
        BackendError(e.to_string())
    }
}

/// Binary log coordinates of a master
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterStatus {
    pub file: String,
    pub position: u64,
}

/// Observed replication state of one replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub io_running: bool,
    pub sql_running: bool,
    pub seconds_behind_master: Option<u64>,
    pub last_error: Option<String>,
}

impl ReplicaStatus {
    pub fn is_running(&self) -> bool {
        self.io_running && self.sql_running
    }
}

/// Executes replication commands against one database server
#[async_trait]
pub trait ReplicationBackend: Send + Sync {
    async fn execute(&self, server: &ServerProfile, sql: &str) -> Result<(), BackendError>;

    /// `None` when binary logging is disabled on the server
    async fn master_status(&self, server: &ServerProfile) -> Result<Option<MasterStatus>, BackendError>;

    /// `None` when the server is not configured as a replica
    async fn replica_status(&self, server: &ServerProfile) -> Result<Option<ReplicaStatus>, BackendError>;
}

/// Backend opening a short-lived MySQL connection per command
pub struct MySqlBackend {
    timeout: Duration,
}

impl MySqlBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, BackendError>
    where
        F: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(BackendError::from),
            Err(_) => Err(BackendError(format!("{} timed out after {:?}", what, self.timeout))),
        }
    }

    async fn connect(&self, server: &ServerProfile) -> Result<MySqlConnection, BackendError> {
        let mut options = MySqlConnectOptions::new()
            .host(&server.host)
            .port(server.port)
            .username(&server.user)
            .password(&server.password);
        if let Some(database) = &server.database {
            options = options.database(database);
        }

        debug!("Connecting to {}:{}", server.host, server.port);
        self.bounded("connect", MySqlConnection::connect_with(&options)).await
    }

    async fn query_one(&self, server: &ServerProfile, sql: &str) -> Result<Option<MySqlRow>, BackendError> {
        let mut conn = self.connect(server).await?;
        let row = self.bounded(sql, conn.fetch_optional(sql)).await?;
        let _ = conn.close().await;
        Ok(row)
    }
}

fn text_column(row: &MySqlRow, name: &str) -> Result<Option<String>, BackendError> {
    if let Ok(value) = row.try_get::<Option<String>, _>(name) {
        return Ok(value);
    }
    let bytes: Option<Vec<u8>> = row.try_get(name)?;
    Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
}

#[async_trait]
impl ReplicationBackend for MySqlBackend {
    async fn execute(&self, server: &ServerProfile, sql: &str) -> Result<(), BackendError> {
        let mut conn = self.connect(server).await?;
        self.bounded("command", conn.execute(sql)).await?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn master_status(&self, server: &ServerProfile) -> Result<Option<MasterStatus>, BackendError> {
        let Some(row) = self.query_one(server, "SHOW MASTER STATUS").await? else {
            return Ok(None);
        };

        let file = text_column(&row, "File")?.unwrap_or_default();
        let position: u64 = row.try_get("Position")?;
        Ok(Some(MasterStatus { file, position }))
    }

    async fn replica_status(&self, server: &ServerProfile) -> Result<Option<ReplicaStatus>, BackendError> {
        let Some(row) = self.query_one(server, "SHOW SLAVE STATUS").await? else {
            return Ok(None);
        };

        let running = |column: &str| -> Result<bool, BackendError> {
            Ok(text_column(&row, column)?
                .map(|v| v.eq_ignore_ascii_case("yes"))
                .unwrap_or(false))
        };
        let io_running = running("Slave_IO_Running")?;
        let sql_running = running("Slave_SQL_Running")?;
        let seconds_behind_master: Option<u64> = row.try_get("Seconds_Behind_Master")?;

        let last_error = [text_column(&row, "Last_IO_Error")?, text_column(&row, "Last_SQL_Error")?]
            .into_iter()
            .flatten()
            .find(|e| !e.is_empty());

        Ok(Some(ReplicaStatus {
            io_running,
            sql_running,
            seconds_behind_master,
            last_error,
        }))
    }
}
