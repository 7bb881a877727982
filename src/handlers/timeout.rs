// src/handlers/timeout.rs

use super::base::{Action, ResponseHandler};
use crate::error::AppError;
use axum::{body::Bytes, http::StatusCode, response::Response};
use tracing::warn;

/// Claims timeout-shaped responses: 408, 504, and server errors whose body
/// mentions a timeout. All of them charge the small-failure track.
pub struct TimeoutHandler;

impl ResponseHandler for TimeoutHandler {
    fn handle(&self, response: &Response, body_bytes: &Bytes, key_id: &str) -> Option<Action> {
        let status = response.status();

        if matches!(status, StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT) {
            warn!(
                key.id = %key_id,
                status = status.as_u16(),
                "Timeout response from upstream, will retry with next key"
            );
            return Some(Action::RetryNextKey(AppError::UpstreamTimeout {
                timeout_secs: None,
            }));
        }

        if status.is_server_error() {
            let body_text = String::from_utf8_lossy(body_bytes);
            if body_text.contains("timeout") || body_text.contains("timed out") {
                warn!(
                    key.id = %key_id,
                    status = status.as_u16(),
                    "Server error with timeout indication, retrying with next key"
                );
                return Some(Action::RetryNextKey(AppError::UpstreamTimeout {
                    timeout_secs: None,
                }));
            }
        }

        None
    }
}
