use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Request, StatusCode},
    routing::get,
    Router,
};
use hostplane_cluster::{HealthProbe, ProbeOutcome};
use hostplane_common::types::{ClusterNode, ServerProfile};
use hostplane_replication::{BackendError, MasterStatus, ReplicaStatus, ReplicationBackend};
use hostplane_server::auth::Permission;
use hostplane_server::config::{ApiKeyConfig, Settings};
use hostplane_server::{create_router, AppState};
use hostplane_storage::Stores;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const ADMIN_KEY: &str = "admin-key";
const READ_KEY: &str = "read-key";

/// Probe answering from a set of healthy hostnames
#[derive(Default)]
struct HostnameProbe {
    healthy: Mutex<HashSet<String>>,
}

impl HostnameProbe {
    fn set(&self, hostname: &str, healthy: bool) {
        let mut set = self.healthy.lock();
        if healthy {
            set.insert(hostname.to_string());
        } else {
            set.remove(hostname);
        }
    }
}

#[async_trait]
impl HealthProbe for HostnameProbe {
    async fn probe(&self, node: &ClusterNode) -> ProbeOutcome {
        ProbeOutcome {
            healthy: self.healthy.lock().contains(&node.hostname),
            elapsed: Duration::from_millis(1),
            detail: None,
        }
    }
}

/// Replication backend where every command succeeds
struct HealthyReplication;

#[async_trait]
impl ReplicationBackend for HealthyReplication {
    async fn execute(&self, _server: &ServerProfile, _sql: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn master_status(&self, _server: &ServerProfile) -> Result<Option<MasterStatus>, BackendError> {
        Ok(Some(MasterStatus {
            file: "mysql-bin.000001".to_string(),
            position: 4,
        }))
    }

    async fn replica_status(&self, _server: &ServerProfile) -> Result<Option<ReplicaStatus>, BackendError> {
        Ok(Some(ReplicaStatus {
            io_running: true,
            sql_running: true,
            seconds_behind_master: Some(0),
            last_error: None,
        }))
    }
}

fn db(host: &str) -> ServerProfile {
    ServerProfile {
        host: host.to_string(),
        port: 3306,
        user: "root".to_string(),
        password: "rootpw".to_string(),
        database: None,
    }
}

fn settings(with_replication: bool) -> Settings {
    let mut settings = Settings::default();
    settings.log_level = "info".to_string();
    settings.server.node_name = "cp-test".to_string();
    settings.auth.api_keys = vec![
        ApiKeyConfig {
            key: ADMIN_KEY.to_string(),
            description: "admin".to_string(),
            permissions: vec![Permission::ClusterAdmin],
        },
        ApiKeyConfig {
            key: READ_KEY.to_string(),
            description: "reader".to_string(),
            permissions: vec![Permission::ClusterRead],
        },
    ];
    if with_replication {
        settings.replication.master = Some(db("db1"));
        settings.replication.replicas = vec![db("db2")];
        settings.replication.replication_password = "replpw".to_string();
    }
    settings
}

fn app(with_replication: bool) -> (Router, Arc<HostnameProbe>) {
    let probe = Arc::new(HostnameProbe::default());
    let state = AppState::assemble(
        &settings(with_replication),
        Stores::in_memory(),
        probe.clone(),
        Arc::new(HealthyReplication),
    )
    .unwrap();
    (create_router(state), probe)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value, HeaderMap) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {}", key));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json, headers)
}

async fn add_node(app: &Router, hostname: &str, port: u16, priority: i32) -> u64 {
    let (status, body, _) = call(
        app,
        "POST",
        "/nodes",
        Some(ADMIN_KEY),
        Some(json!({ "hostname": hostname, "ip": "127.0.0.1", "port": port, "priority": priority })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["data"]["id"].as_u64().unwrap()
}

#[tokio::test]
async fn test_liveness_is_public() {
    let (app, _) = app(false);
    let (status, body, _) = call(&app, "GET", "/", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["node"], "cp-test");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_admin_api_requires_key() {
    let (app, _) = app(false);

    let (status, body, _) = call(&app, "GET", "/nodes", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "unauthorized");

    let (status, _, _) = call(&app, "GET", "/nodes", Some("wrong"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body, _) = call(&app, "GET", "/nodes", Some(READ_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body, _) = call(&app, "POST", "/election", Some(READ_KEY), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "forbidden");
}

#[tokio::test]
async fn test_node_registration() {
    let (app, _) = app(false);
    add_node(&app, "cp2", 9002, 20).await;
    add_node(&app, "cp1", 9001, 10).await;

    let (_, body, _) = call(&app, "GET", "/nodes", Some(ADMIN_KEY), None).await;
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["hostname"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["cp1", "cp2"]);

    let (status, body, _) = call(
        &app,
        "POST",
        "/nodes",
        Some(ADMIN_KEY),
        Some(json!({ "hostname": "", "ip": "127.0.0.1", "port": 9003, "priority": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation_error");

    let (status, body, _) = call(&app, "POST", "/nodes", Some(ADMIN_KEY), Some(json!({ "hostname": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_election_and_primary_protection() {
    let (app, probe) = app(false);
    let first = add_node(&app, "cp1", 9001, 10).await;
    let second = add_node(&app, "cp2", 9002, 20).await;
    let third = add_node(&app, "cp3", 9003, 30).await;
    probe.set("cp1", true);
    probe.set("cp3", true);

    let (status, body, _) = call(&app, "POST", "/election", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["primary"], first);

    let (_, body, _) = call(&app, "GET", "/status", Some(READ_KEY), None).await;
    assert_eq!(body["data"]["current_primary"]["id"], first);
    assert_eq!(body["data"]["healthy_nodes"], 2);
    assert_eq!(body["data"]["total_nodes"], 3);
    assert!(body["data"]["database_master"].is_null());

    let (status, body, _) = call(&app, "DELETE", &format!("/nodes/{}", first), Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "primary_node_protected");

    let (status, _, _) = call(
        &app,
        "PATCH",
        &format!("/nodes/{}", first),
        Some(ADMIN_KEY),
        Some(json!({ "enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = call(&app, "DELETE", &format!("/nodes/{}", second), Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body, _) = call(&app, "GET", "/nodes", Some(ADMIN_KEY), None).await;
    let ids: Vec<u64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![first, third]);

    let (status, _, _) = call(&app, "DELETE", "/nodes/999", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_election_without_healthy_nodes() {
    let (app, _) = app(false);
    add_node(&app, "cp1", 9001, 10).await;

    let (status, body, _) = call(&app, "POST", "/election", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "no_healthy_nodes");
}

#[tokio::test]
async fn test_manual_failover_and_history() {
    let (app, probe) = app(false);
    let first = add_node(&app, "cp1", 9001, 10).await;
    let second = add_node(&app, "cp2", 9002, 20).await;
    probe.set("cp1", true);
    call(&app, "POST", "/election", Some(ADMIN_KEY), None).await;

    let (status, body, _) = call(
        &app,
        "POST",
        "/failover",
        Some(ADMIN_KEY),
        Some(json!({ "targetNodeId": second })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "target_unhealthy");

    probe.set("cp2", true);
    let (status, body, _) = call(
        &app,
        "POST",
        "/failover",
        Some(ADMIN_KEY),
        Some(json!({ "target_node_id": second })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["changed"], true);
    assert_eq!(body["data"]["event"]["reason"], "manual");

    let (_, body, _) = call(&app, "GET", "/failover/history?limit=10", Some(READ_KEY), None).await;
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["old_primary"], first);
    assert_eq!(events[0]["new_primary"], second);
    assert_eq!(events[0]["new_hostname"], "cp2");
}

#[tokio::test]
async fn test_replication_endpoints() {
    let (app, _) = app(false);
    let (status, body, _) = call(&app, "GET", "/database/replication", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "service_unavailable");

    let (app, _) = app_with_replication();
    let (status, body, _) = call(&app, "GET", "/database/replication", Some(READ_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["healthy"], true);
    assert_eq!(body["data"]["master"], "db1");

    let (status, body, _) = call(&app, "POST", "/database/master", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["file"], "mysql-bin.000001");

    let (status, body, _) = call(&app, "POST", "/database/replicas/db2", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["io_running"], true);

    let (status, _, _) = call(&app, "POST", "/database/replicas/db7", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body, _) = call(
        &app,
        "POST",
        "/database/promote",
        Some(ADMIN_KEY),
        Some(json!({ "slaveHost": "db2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["new_master"], "db2");

    let (_, body, _) = call(&app, "GET", "/status", Some(READ_KEY), None).await;
    assert_eq!(body["data"]["database_master"], "db2");
}

fn app_with_replication() -> (Router, Arc<HostnameProbe>) {
    app(true)
}

#[tokio::test]
async fn test_proxy_without_healthy_nodes() {
    let (app, _) = app(false);
    add_node(&app, "cp1", 9001, 10).await;

    let (status, body, _) = call(&app, "GET", "/lb/api/ping", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_proxy_forwards_to_healthy_node() {
    let backend = Router::new().route("/api/ping", get(|| async { "pong" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, backend).await.unwrap();
    });

    let (app, probe) = app(false);
    let id = add_node(&app, "cp1", port, 10).await;
    probe.set("cp1", true);
    let (status, _, _) = call(&app, "POST", "/nodes/health", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .uri("/lb/api/ping")
        .header("x-lb-strategy", "least_connections")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-hostplane-node"], id.to_string().as_str());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"pong");

    let (_, body, _) = call(&app, "GET", "/loadbalancer/stats", Some(READ_KEY), None).await;
    assert_eq!(body["data"]["healthy_nodes"], 1);
    assert_eq!(body["data"]["total_dispatched"], 1);
    assert_eq!(body["data"]["nodes"][0]["open_connections"], 0);

    let (status, _, _) = call(&app, "GET", "/lb/api/ping", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .uri("/lb/api/ping")
        .header("x-lb-strategy", "fastest")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_balancer_reload_and_sessions() {
    let (app, _) = app(false);

    let (status, body, _) = call(&app, "POST", "/loadbalancer/reload", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["healthy_nodes"], 0);

    let (status, body, _) = call(&app, "GET", "/sessions/stats", Some(READ_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);
    assert_eq!(body["data"]["ttl_seconds"], 3600);

    let (status, body, _) = call(&app, "POST", "/sessions/cleanup", Some(ADMIN_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], 0);
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let (app, _) = app(false);
    let (status, _, _) = call(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
