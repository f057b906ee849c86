//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use plane_api::models::{HealthResponse, VersionResponse};
use secrecy::SecretString;

use crate::server::state::ServerState;
use crate::utils::version_info;

/// Header carrying a raw credential as an alternative to `Authorization`
pub const API_KEY_HEADER: &str = "x-api-key";

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "slotplane".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Tool endpoint: `POST /api/tool` with `{"tool": ..., "params": {...}}`
pub async fn tool_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let credential = extract_credential(&headers);
    let (status, response) = state.dispatcher.handle(credential, &body).await;
    (status, Json(response))
}

/// Bearer token first, then the API key header
pub fn extract_credential(headers: &HeaderMap) -> Option<SecretString> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    bearer
        .or(api_key)
        .filter(|token| !token.is_empty())
        .map(|token| SecretString::from(token.to_string()))
}
