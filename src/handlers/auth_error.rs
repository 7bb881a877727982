// src/handlers/auth_error.rs

use super::base::{Action, ResponseHandler};
use crate::error::AppError;
use axum::{body::Bytes, http::StatusCode, response::Response};
use tracing::warn;

/// Claims 401 and 403 responses. The upstream rejected the credential itself,
/// so the key is charged on the big-failure track.
pub struct AuthErrorHandler;

impl ResponseHandler for AuthErrorHandler {
    fn handle(&self, response: &Response, _body_bytes: &Bytes, key_id: &str) -> Option<Action> {
        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            warn!(
                key.id = %key_id,
                status = status.as_u16(),
                "Upstream rejected credential"
            );
            return Some(Action::BigFailure(AppError::UpstreamAuthError {
                status: status.as_u16(),
            }));
        }
        None
    }
}
