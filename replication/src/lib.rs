//! Replication orchestration: master setup, replica setup, topology health
//! and replica promotion.

pub mod backend;
pub mod orchestrator;
pub mod sql;

pub use backend::{BackendError, MasterStatus, MySqlBackend, ReplicaStatus, ReplicationBackend};
pub use orchestrator::{
    Promotion, ReplicaHealth, ReplicaSetup, ReplicationCredential, ReplicationOrchestrator,
    ReplicationTopology, TopologyStatus,
};
