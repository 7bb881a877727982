// src/handlers/success.rs

use super::base::{Action, ResponseHandler};
use axum::{body::Bytes, response::Response};

pub struct SuccessHandler;

impl ResponseHandler for SuccessHandler {
    fn handle(&self, response: &Response, _body_bytes: &Bytes, _key_id: &str) -> Option<Action> {
        if response.status().is_success() {
            Some(Action::ReturnToClient)
        } else {
            None
        }
    }
}
