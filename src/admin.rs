// src/admin.rs

use crate::{error::Result, state::AppState};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/reload", post(reload))
        .route("/admin/keys/:id/reset", post(reset_key))
}

/// Re-reads the configuration file and replaces the config snapshot and the
/// key pool atomically. A failed reload leaves the running state untouched.
async fn reload(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let key_count = state.reload().await?;
    Ok(Json(json!({
        "status": "reloaded",
        "keys": key_count,
    })))
}

/// Returns a single key to service with clean counters, clearing a
/// quarantine or a blacklist. 404 for an unknown id.
async fn reset_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.pool().await.reset_key(&id)?;
    info!(key.id = %id, "Key reset by administrative request");
    Ok(Json(json!({
        "status": "reset",
        "id": id,
    })))
}
