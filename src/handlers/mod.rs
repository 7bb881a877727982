// src/handlers/mod.rs

pub mod auth_error;
pub mod base;
pub mod processor;
pub mod quota;
pub mod server_error;
pub mod success;
pub mod terminal_error;
pub mod timeout;

use base::ResponseHandler;

/// The standard classification chain, most specific first. Order matters:
/// `TimeoutHandler` must see 5xx responses before `ServerErrorHandler` claims
/// them wholesale.
pub fn default_chain() -> Vec<Box<dyn ResponseHandler>> {
    vec![
        Box::new(success::SuccessHandler),
        Box::new(timeout::TimeoutHandler),
        Box::new(auth_error::AuthErrorHandler),
        Box::new(quota::QuotaHandler),
        Box::new(server_error::ServerErrorHandler),
        Box::new(terminal_error::TerminalErrorHandler),
    ]
}
