use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::StatusCode,
    response::Response,
};
use hostplane_cluster::{ProxyRequest, Strategy};
use hostplane_common::ControlPlaneError;

/// Request header selecting the balancing strategy for one call
pub const STRATEGY_HEADER: &str = "x-lb-strategy";

/// Response header naming the node that served the call
pub const SERVED_BY_HEADER: &str = "x-hostplane-node";

const MAX_PROXY_BODY: usize = 16 * 1024 * 1024;

/// `ANY /lb/*path`: forward the request to one healthy node
pub async fn forward(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();

    let strategy = match parts.headers.get(STRATEGY_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| ApiError::BadRequest(format!("invalid {} header", STRATEGY_HEADER)))?
            .parse::<Strategy>()?,
        None => state.balancer.default_strategy(),
    };

    let path = match parts.uri.path().strip_prefix("/lb") {
        Some(rest) if !rest.is_empty() => rest,
        _ => "/",
    };
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| name.as_str() != STRATEGY_HEADER)
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let body = to_bytes(body, MAX_PROXY_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {}", e)))?;

    let upstream = state
        .balancer
        .dispatch(
            ProxyRequest {
                method: parts.method.as_str().to_string(),
                path_and_query,
                headers,
                body: body.to_vec(),
            },
            strategy,
        )
        .await?;

    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &upstream.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .header(SERVED_BY_HEADER, upstream.node_id.to_string())
        .body(Body::from(upstream.body))
        .map_err(|e| ApiError::ControlPlane(ControlPlaneError::Internal(format!("invalid upstream response: {}", e))))
}
