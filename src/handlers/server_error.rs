// src/handlers/server_error.rs

use super::base::{Action, ResponseHandler};
use crate::error::AppError;
use axum::{body::Bytes, response::Response};
use tracing::warn;

/// Claims the remaining 5xx responses. Server-side trouble says nothing
/// permanent about the key, so these charge the small-failure track.
///
/// Runs after [`super::timeout::TimeoutHandler`], which already claimed 504
/// and timeout-shaped bodies.
pub struct ServerErrorHandler;

impl ResponseHandler for ServerErrorHandler {
    fn handle(&self, response: &Response, _body_bytes: &Bytes, key_id: &str) -> Option<Action> {
        let status = response.status();
        if status.is_server_error() {
            warn!(
                key.id = %key_id,
                status = status.as_u16(),
                "Upstream server error, will retry with next key"
            );
            return Some(Action::RetryNextKey(AppError::UpstreamServerError {
                status: status.as_u16(),
            }));
        }
        None
    }
}
