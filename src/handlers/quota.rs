// src/handlers/quota.rs

use super::base::{Action, ResponseHandler};
use crate::error::AppError;
use axum::{body::Bytes, http::StatusCode, response::Response};
use tracing::warn;

/// Claims 429 responses. Quota exhaustion is a property of the key, not of
/// the request, so it is charged on the big-failure track.
pub struct QuotaHandler;

impl ResponseHandler for QuotaHandler {
    fn handle(&self, response: &Response, _body_bytes: &Bytes, key_id: &str) -> Option<Action> {
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!(key.id = %key_id, "Upstream reported quota exhausted for key");
            return Some(Action::BigFailure(AppError::UpstreamQuotaExceeded));
        }
        None
    }
}
