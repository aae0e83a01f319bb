use crate::auth::Permission;
use hostplane_cluster::{ClusterConfig, Strategy};
use hostplane_common::types::ServerProfile;
use hostplane_common::{ControlPlaneError, Result};
use hostplane_replication::{ReplicationCredential, ReplicationTopology};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `HOSTPLANE__SERVER__BIND`
pub const ENV_PREFIX: &str = "HOSTPLANE";

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub log_level: String,
    pub storage: StorageSettings,
    pub health: HealthSettings,
    pub election: ElectionSettings,
    pub load_balancer: LoadBalancerSettings,
    pub replication: ReplicationSettings,
    pub sessions: SessionSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// Name reported by the liveness endpoint
    pub node_name: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8443".to_string(),
            node_name: "hostplane".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Mysql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub max_concurrency: usize,
    pub path: String,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 5,
            max_concurrency: 8,
            path: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSettings {
    pub auto_failover: bool,
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self { auto_failover: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerSettings {
    pub default_strategy: Strategy,
    pub dispatch_timeout_secs: u64,
    pub refresh_interval_secs: u64,
}

impl Default for LoadBalancerSettings {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::RoundRobin,
            dispatch_timeout_secs: 30,
            refresh_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    pub master: Option<ServerProfile>,
    pub replicas: Vec<ServerProfile>,
    pub replication_user: String,
    #[serde(skip_serializing)]
    pub replication_password: String,
    pub command_timeout_secs: u64,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            master: None,
            replicas: Vec::new(),
            replication_user: "repl".to_string(),
            replication_password: String::new(),
            command_timeout_secs: 10,
        }
    }
}

impl ReplicationSettings {
    /// Configured topology, if a master is set
    pub fn topology(&self) -> Option<ReplicationTopology> {
        self.master.as_ref().map(|master| ReplicationTopology {
            master: master.clone(),
            replicas: self.replicas.clone(),
        })
    }

    pub fn credential(&self) -> ReplicationCredential {
        ReplicationCredential {
            user: self.replication_user.clone(),
            password: self.replication_password.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub ttl_secs: i64,
    pub cleanup_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: hostplane_storage::session::DEFAULT_SESSION_TTL_SECS,
            cleanup_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub api_keys: Vec<ApiKeyConfig>,
}

/// Statically configured admin API key
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    #[serde(skip_serializing)]
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub permissions: Vec<Permission>,
}

impl std::fmt::Debug for ApiKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyConfig")
            .field("description", &self.description)
            .field("permissions", &self.permissions)
            .finish()
    }
}

impl Settings {
    /// Load defaults, then the YAML file at `path` (if present), then
    /// `HOSTPLANE__*` environment variables, then CLI overrides
    pub fn load(path: &Path, bind: Option<&str>, log_level: Option<&str>) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.bind", bind)
            .and_then(|b| b.set_override_option("log_level", log_level))
            .map_err(config_err)?;

        let mut settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_err)?;

        if settings.log_level.is_empty() {
            settings.log_level = "info".to_string();
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the control plane cannot run with
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.health.interval_secs, "health.interval_secs"),
            (self.health.timeout_secs, "health.timeout_secs"),
            (self.load_balancer.dispatch_timeout_secs, "load_balancer.dispatch_timeout_secs"),
            (self.load_balancer.refresh_interval_secs, "load_balancer.refresh_interval_secs"),
            (self.replication.command_timeout_secs, "replication.command_timeout_secs"),
            (self.sessions.cleanup_interval_secs, "sessions.cleanup_interval_secs"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(ControlPlaneError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.health.max_concurrency == 0 {
            return Err(ControlPlaneError::Config(
                "health.max_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.sessions.ttl_secs <= 0 {
            return Err(ControlPlaneError::Config(
                "sessions.ttl_secs must be greater than zero".to_string(),
            ));
        }

        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ControlPlaneError::Config(format!(
                "server.bind '{}' is not a socket address",
                self.server.bind
            )));
        }

        if self.storage.backend == StorageBackend::Mysql
            && self.storage.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ControlPlaneError::Config(
                "storage.url is required for the mysql backend".to_string(),
            ));
        }

        let mut hosts = HashSet::new();
        if let Some(master) = &self.replication.master {
            hosts.insert(master.host.as_str());
        }
        for replica in &self.replication.replicas {
            if !hosts.insert(replica.host.as_str()) {
                return Err(ControlPlaneError::Config(format!(
                    "replication host '{}' is listed more than once",
                    replica.host
                )));
            }
        }
        if !self.replication.replicas.is_empty() && self.replication.master.is_none() {
            return Err(ControlPlaneError::Config(
                "replication.replicas requires replication.master".to_string(),
            ));
        }
        if self.replication.master.is_some() {
            if self.replication.replication_user.trim().is_empty() {
                return Err(ControlPlaneError::Config(
                    "replication.replication_user is required when a master is configured".to_string(),
                ));
            }
            if self.replication.replication_password.is_empty() {
                return Err(ControlPlaneError::Config(
                    "replication.replication_password is required when a master is configured".to_string(),
                ));
            }
        }

        if self.auth.api_keys.is_empty() {
            return Err(ControlPlaneError::Config(
                "at least one entry in auth.api_keys is required".to_string(),
            ));
        }
        if self.auth.api_keys.iter().any(|k| k.key.trim().is_empty()) {
            return Err(ControlPlaneError::Config("auth.api_keys entries need a key".to_string()));
        }

        Ok(())
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            health_check_interval: Duration::from_secs(self.health.interval_secs),
            probe_timeout: Duration::from_secs(self.health.timeout_secs),
            max_concurrent_probes: self.health.max_concurrency,
            probe_path: self.health.path.clone(),
            auto_failover: self.election.auto_failover,
            dispatch_timeout: Duration::from_secs(self.load_balancer.dispatch_timeout_secs),
        }
    }
}

fn config_err(e: config::ConfigError) -> ControlPlaneError {
    ControlPlaneError::Config(e.to_string())
}
