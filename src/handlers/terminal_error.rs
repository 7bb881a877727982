// src/handlers/terminal_error.rs

use super::base::{Action, ResponseHandler};
use axum::{body::Bytes, response::Response};
use tracing::info;

/// Claims the remaining 4xx responses. These are caller errors (malformed
/// body, unknown route, oversized payload) that would fail identically on
/// every key, so they are relayed without charging the key and without
/// consuming the retry budget.
pub struct TerminalErrorHandler;

impl ResponseHandler for TerminalErrorHandler {
    fn handle(&self, response: &Response, _body_bytes: &Bytes, key_id: &str) -> Option<Action> {
        let status = response.status();
        if status.is_client_error() {
            info!(
                key.id = %key_id,
                status = status.as_u16(),
                "Terminal client error, relaying without retry"
            );
            return Some(Action::Terminal);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode};

    fn response(status: StatusCode) -> Response {
        Response::builder().status(status).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_claims_remaining_4xx() {
        for status in [StatusCode::BAD_REQUEST, StatusCode::NOT_FOUND, StatusCode::PAYLOAD_TOO_LARGE] {
            let action = TerminalErrorHandler.handle(&response(status), &Bytes::new(), "k1");
            assert_eq!(action, Some(Action::Terminal));
        }
    }

    #[test]
    fn test_ignores_success_and_5xx() {
        for status in [StatusCode::OK, StatusCode::INTERNAL_SERVER_ERROR] {
            assert!(TerminalErrorHandler.handle(&response(status), &Bytes::new(), "k1").is_none());
        }
    }
}
