// src/lib.rs

pub mod admin;
pub mod api;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod pool;
pub mod proxy;
pub mod state;

use crate::api::{health_check, proxy_handler, status};
use axum::{
    body::Body,
    http::{HeaderValue, Request as AxumRequest},
    response::IntoResponse,
    routing::{any, get},
    Router,
};
use std::{path::PathBuf, sync::Arc, time::Instant};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use state::AppState;

/// Creates the main application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .merge(admin::admin_routes())
        .route("/proxy/*path", any(proxy_handler))
        .with_state(state)
}

/// Middleware that assigns a request id and traces every request.
async fn trace_requests(
    mut req: AxumRequest<Body>,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let request_id = Uuid::new_v4();
    let start_time = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        http.method = %method,
        url.path = %path,
    );

    req.extensions_mut().insert(request_id);

    async move {
        let mut response = next.run(req).await;
        let elapsed = start_time.elapsed();

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("X-Request-ID", value);
        }

        info!(
            http.response.duration = ?elapsed,
            http.status_code = response.status().as_u16(),
            "Finished processing request"
        );

        response
    }
    .instrument(span)
    .await
}

/// Loads configuration, builds the shared state and the router, and starts
/// the background quarantine sweep.
pub async fn run(config_path_override: Option<PathBuf>) -> Result<(Router, Arc<AppState>)> {
    info!("Starting key-pool proxy...");

    let (app_config, config_path) = setup_configuration(config_path_override)?;
    let sweep_interval = std::time::Duration::from_secs(app_config.pool.sweep_interval_secs);

    let app_state = Arc::new(AppState::new(app_config, &config_path).map_err(|e| {
        error!(error = ?e, "Failed to initialize application state. Exiting.");
        e
    })?);

    pool::sweeper::spawn(app_state.clone(), sweep_interval);

    let app = create_router(app_state.clone()).layer(axum::middleware::from_fn(trace_requests));

    Ok((app, app_state))
}

/// Loads, validates, and logs the application configuration.
fn setup_configuration(config_path_override: Option<PathBuf>) -> Result<(AppConfig, PathBuf)> {
    let config_path = config_path_override.unwrap_or_else(|| {
        std::env::var("CONFIG_PATH").map_or_else(|_| PathBuf::from("config.yaml"), PathBuf::from)
    });

    let config_path_display = config_path.display().to_string();
    info!(config.path = %config_path_display, "Using configuration file");

    let app_config = config::load_config(&config_path).map_err(|e| {
        error!(
            config.path = %config_path_display,
            error = ?e,
            "Failed to load or validate configuration. Exiting."
        );
        e
    })?;

    info!(
        config.total_keys = app_config.resolved_keys().len(),
        config.pool_type = ?app_config.pool.pool_type,
        server.port = app_config.server.port,
        upstream.url = %app_config.upstream_url,
        "Configuration loaded and validated successfully."
    );

    Ok((app_config, config_path))
}
