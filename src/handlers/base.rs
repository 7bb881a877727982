// src/handlers/base.rs

use crate::error::AppError;
use axum::{body::Bytes, response::Response};

/// Defines the next action to be taken by the dispatch loop.
#[derive(Debug)]
pub enum Action {
    /// The response is final and should be relayed to the client as-is.
    ReturnToClient,
    /// Transient failure on this key. Charge the small-failure track and
    /// retry with a different key if the request budget allows.
    RetryNextKey(AppError),
    /// Severe failure on this key. Charge the big-failure track and relay
    /// the upstream response as the final outcome; no request-level retry.
    BigFailure(AppError),
    /// Caller error unrelated to key health. Relay without charging the key.
    Terminal,
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        // Tests care about the variant, not the carried error.
        matches!(
            (self, other),
            (Action::ReturnToClient, Action::ReturnToClient)
                | (Action::RetryNextKey(_), Action::RetryNextKey(_))
                | (Action::BigFailure(_), Action::BigFailure(_))
                | (Action::Terminal, Action::Terminal)
        )
    }
}

/// A trait for classifying responses from the upstream service.
/// Each implementation is responsible for a specific case (e.g. success,
/// timeout, credential rejection).
pub trait ResponseHandler: Send + Sync {
    /// Examines the response and decides on the next action.
    ///
    /// Returns `Some(Action)` if this handler recognizes the response, or
    /// `None` to let the next handler in the chain try.
    fn handle(&self, response: &Response, body_bytes: &Bytes, key_id: &str) -> Option<Action>;
}
