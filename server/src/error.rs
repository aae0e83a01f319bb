use crate::auth::AuthError;
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hostplane_common::ControlPlaneError;
use serde::Serialize;
use tracing::error;

/// REST API response wrapper
#[derive(Debug, Serialize)]
#[serde(bound(serialize = "T: Serialize"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }
}

/// Errors returned by the admin API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ControlPlane(e) => match e {
                ControlPlaneError::Validation(_) => StatusCode::BAD_REQUEST,
                ControlPlaneError::NodeNotFound(_) | ControlPlaneError::ReplicaNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ControlPlaneError::PrimaryNodeProtected(_) => StatusCode::FORBIDDEN,
                ControlPlaneError::TargetUnhealthy(_) => StatusCode::CONFLICT,
                ControlPlaneError::NoHealthyNodes | ControlPlaneError::ServiceUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ControlPlaneError::Replication { .. } | ControlPlaneError::BadGateway(_) => {
                    StatusCode::BAD_GATEWAY
                }
                ControlPlaneError::Storage(_)
                | ControlPlaneError::Config(_)
                | ControlPlaneError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Auth(AuthError::MissingApiKey | AuthError::InvalidApiKey) => StatusCode::UNAUTHORIZED,
            ApiError::Auth(AuthError::PermissionDenied) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::ControlPlane(e) => e.kind(),
            ApiError::Auth(AuthError::MissingApiKey | AuthError::InvalidApiKey) => "unauthorized",
            ApiError::Auth(AuthError::PermissionDenied) => "forbidden",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: status={}, error={}", status.as_u16(), self);
        }
        (status, Json(ApiResponse::error(self.kind(), self.to_string()))).into_response()
    }
}
