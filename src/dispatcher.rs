// src/dispatcher.rs

use crate::{
    error::{AppError, Result},
    handlers::base::Action,
    handlers::processor::ResponseProcessor,
    proxy,
    state::AppState,
};
use axum::{
    body::Bytes,
    http::{header, HeaderMap, Method, Uri},
    response::Response,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, trace, warn};

/// One inbound request, buffered and ready to forward.
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

fn is_streaming_response(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"))
}

/// Drives one request to completion: select a key, forward, classify the
/// outcome, update key health, and retry with a different key while the
/// request-level budget allows.
///
/// The budget (`max_request_retries`) counts retries after the first
/// attempt and is independent of the per-key failure counters. Each failed
/// attempt's key is excluded from selection for the remainder of this
/// request, so a retry never re-hits the key that just failed.
pub async fn dispatch(
    state: &Arc<AppState>,
    processor: &ResponseProcessor,
    ctx: RequestContext,
) -> Result<Response> {
    let config = state.config().await;
    let pool = state.pool().await;
    let request_timeout = config.pool.request_timeout();
    let max_attempts = 1 + config.pool.max_request_retries;

    let mut tried: HashSet<String> = HashSet::new();
    let mut last_response: Option<Response> = None;
    let mut last_error: Option<AppError> = None;

    for attempt in 1..=max_attempts {
        let key = match pool.select_key_excluding(&tried) {
            Ok(key) => key,
            Err(AppError::PoolExhausted) => break,
            Err(e) => return Err(e),
        };
        tried.insert(key.id.clone());

        trace!(
            attempt,
            key.id = %key.id,
            key.preview = %key.credential_preview(),
            "Dispatching attempt"
        );

        let response = match proxy::forward_request(
            state.client(),
            &key,
            &config.upstream_url,
            ctx.method.clone(),
            ctx.uri.clone(),
            ctx.headers.clone(),
            ctx.body.clone(),
            request_timeout,
        )
        .await
        {
            Ok(r) => r,
            Err(e) => {
                // Transport-level failures (connect refused, send timed out)
                // never reached the upstream with a verdict on the key, so
                // they charge the small-failure track like a 5xx.
                warn!(attempt, key.id = %key.id, error = %e, "Attempt failed before a response");
                pool.report_small_failure(&key.id);
                last_error = Some(e);
                continue;
            }
        };

        // A successful streaming body cannot be buffered for classification;
        // hand it straight back to the client.
        if response.status().is_success() && is_streaming_response(&response) {
            info!(key.id = %key.id, "Relaying streaming response directly to client");
            pool.report_success(&key.id);
            return Ok(response);
        }

        let (action, final_response) = processor.process(response, &key.id).await?;

        match action {
            Action::ReturnToClient => {
                pool.report_success(&key.id);
                return Ok(final_response);
            }
            Action::Terminal => {
                // Caller error. The key did nothing wrong.
                return Ok(final_response);
            }
            Action::RetryNextKey(reason) => {
                warn!(attempt, key.id = %key.id, error = %reason, "Transient failure, trying next key");
                pool.report_small_failure(&key.id);
                last_response = Some(final_response);
                last_error = Some(reason);
            }
            Action::BigFailure(reason) => {
                // Severe failures are a verdict on the key, not the upstream.
                // The response is relayed as the final outcome so the caller
                // sees exactly what the upstream said.
                warn!(attempt, key.id = %key.id, error = %reason, "Severe failure on key");
                pool.report_big_failure(&key.id);
                return Ok(final_response);
            }
        }
    }

    // Budget or pool exhausted. Prefer relaying the last thing the upstream
    // actually said over synthesizing an error.
    if let Some(response) = last_response {
        info!(status = %response.status(), "Retry budget exhausted, relaying last upstream response");
        return Ok(response);
    }
    if let Some(error) = last_error {
        return Err(error);
    }

    warn!("No eligible key in the pool for this request");
    Err(AppError::NoAvailableKey)
}
