// src/handlers/processor.rs

use crate::{
    error::Result,
    handlers::base::{Action, ResponseHandler},
};
use axum::{
    body::{to_bytes, Body},
    response::Response,
};
use std::sync::Arc;

/// Classifies upstream responses by running them through a chain of handlers.
pub struct ResponseProcessor {
    handlers: Arc<Vec<Box<dyn ResponseHandler>>>,
}

impl ResponseProcessor {
    pub fn new(handlers: Vec<Box<dyn ResponseHandler>>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    /// Buffers the response body, runs the handler chain, and returns the
    /// chosen action together with the rebuilt response.
    ///
    /// Unrecognized statuses fall through to `ReturnToClient`: whatever the
    /// upstream said is relayed verbatim.
    pub async fn process(&self, response: Response, key_id: &str) -> Result<(Action, Response)> {
        let (parts, body) = response.into_parts();
        let response_bytes = to_bytes(body, usize::MAX).await?;

        let response_for_analysis =
            Response::from_parts(parts.clone(), Body::from(response_bytes.clone()));

        let action = self
            .handlers
            .iter()
            .find_map(|handler| handler.handle(&response_for_analysis, &response_bytes, key_id))
            .unwrap_or(Action::ReturnToClient);

        let final_response = Response::from_parts(parts, Body::from(response_bytes));
        Ok((action, final_response))
    }
}
