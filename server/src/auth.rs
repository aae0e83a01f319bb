use crate::config::ApiKeyConfig;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, Method},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Alternative header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// API key with its permissions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    #[serde(skip_serializing)]
    pub key: String,
    pub description: String,
    pub permissions: Vec<Permission>,
}

/// Permission types for API keys
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Full cluster access (admin)
    ClusterAdmin,
    /// Read-only cluster access
    ClusterRead,
}

/// Operations that require permission checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Admin,
}

impl Operation {
    /// Reads are safe methods, everything else mutates cluster state
    pub fn for_method(method: &Method) -> Self {
        if method == Method::GET || method == Method::HEAD {
            Operation::Read
        } else {
            Operation::Admin
        }
    }
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing API key")]
    MissingApiKey,
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Permission denied")]
    PermissionDenied,
}

/// API key manager
#[derive(Default)]
pub struct ApiKeyManager {
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl ApiKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(keys: &[ApiKeyConfig]) -> Self {
        let manager = Self::new();
        for entry in keys {
            manager.register(entry.key.clone(), entry.description.clone(), entry.permissions.clone());
        }
        manager
    }

    /// Register a key value with its permissions
    pub fn register(&self, key: String, description: String, permissions: Vec<Permission>) -> ApiKey {
        let api_key = ApiKey {
            id: Uuid::new_v4().to_string(),
            key: key.clone(),
            description,
            permissions,
        };
        self.keys.write().insert(key, api_key.clone());
        api_key
    }

    pub fn validate_key(&self, key: &str) -> Result<ApiKey, AuthError> {
        self.keys.read().get(key).cloned().ok_or(AuthError::InvalidApiKey)
    }

    pub fn check_permission(&self, api_key: &ApiKey, operation: Operation) -> Result<(), AuthError> {
        let allowed = api_key.permissions.iter().any(|p| match (p, operation) {
            (Permission::ClusterAdmin, _) => true,
            (Permission::ClusterRead, Operation::Read) => true,
            (Permission::ClusterRead, Operation::Admin) => false,
        });
        if allowed {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied)
        }
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

fn extract_key(request: &Request) -> Option<&str> {
    let headers = request.headers();
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim());
        }
    }
    headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Admin API guard: resolves the caller's key and checks it against the
/// request method
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(key) = extract_key(&request) else {
        counter!("hostplane.api.auth_failures", "reason" => "missing_key").increment(1);
        return Err(AuthError::MissingApiKey.into());
    };
    let api_key = state.auth.validate_key(key).map_err(|e| {
        counter!("hostplane.api.auth_failures", "reason" => "invalid_key").increment(1);
        warn!("Rejected admin request: path={}, reason={}", request.uri().path(), e);
        e
    })?;

    let operation = Operation::for_method(request.method());
    state.auth.check_permission(&api_key, operation).map_err(|e| {
        counter!("hostplane.api.auth_failures", "reason" => "permission_denied").increment(1);
        warn!(
            "Permission denied: key_id={}, method={}, path={}",
            api_key.id,
            request.method(),
            request.uri().path()
        );
        e
    })?;

    debug!("Authenticated admin request: key_id={}", api_key.id);
    request.extensions_mut().insert(api_key);
    Ok(next.run(request).await)
}
