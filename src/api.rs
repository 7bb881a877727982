// src/api.rs

use crate::{
    dispatcher::{self, RequestContext},
    error::Result,
    state::AppState,
};
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Inbound bodies are buffered before forwarding; cap them so a single
/// caller cannot hold the process hostage.
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Entry point for everything under `/proxy/*path`.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let body_bytes = to_bytes(body, MAX_REQUEST_BODY_BYTES).await?;

    debug!(
        method = %parts.method,
        path = %parts.uri.path(),
        body_len = body_bytes.len(),
        "Accepted proxy request"
    );

    let ctx = RequestContext {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body: body_bytes,
    };

    let result = dispatcher::dispatch(&state, state.processor(), ctx).await;

    match &result {
        Ok(response) if response.status().is_success() => state.stats.record_success(),
        _ => state.stats.record_failure(),
    }

    result
}

/// Liveness probe with uptime and request counters.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.stats.snapshot();
    Json(json!({
        "status": "ok",
        "uptime_seconds": stats.uptime_seconds,
        "total_requests": stats.total_requests,
    }))
}

/// Read-only pool and request statistics. Never exposes credentials.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.pool().await;
    Json(json!({
        "pool": pool.snapshot(),
        "stats": state.stats.snapshot(),
    }))
}
