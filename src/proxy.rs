// src/proxy.rs

use crate::{
    error::{AppError, Result},
    pool::SelectedKey,
};
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderValue, Method, Uri},
    response::Response,
};
use futures_util::TryStreamExt;
use reqwest::Client;
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

// Hop-by-hop headers that must not be forwarded. The auth headers are listed
// here too: the inbound credential is always replaced by the selected key.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "authorization",
];

/// Forwards one buffered inbound request to the upstream with the selected
/// key's credential substituted into the `Authorization` header.
///
/// The caller's method, path, query, remaining headers and body pass through
/// untouched; the upstream response body is streamed back. The send is
/// bounded by `request_timeout` and cancelled by reqwest on expiry.
pub async fn forward_request(
    client: &Client,
    key: &SelectedKey,
    upstream_url: &str,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body_bytes: Bytes,
    request_timeout: Duration,
) -> Result<Response> {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let target_url_str = format!("{}{}", upstream_url.trim_end_matches('/'), path_and_query);

    let target_url = target_url_str.parse::<Uri>().map_err(|e| {
        error!(target_url = %target_url_str, error = %e, "Failed to build target URL");
        AppError::internal(format!("Invalid target URL derived from configuration: {e}"))
    })?;
    debug!(target = %target_url, "Constructed target URL for request");

    let outgoing_headers = build_forward_headers(&headers, key, target_url.host());

    info!(
        method = %method,
        url = %target_url,
        key.id = %key.id,
        "Forwarding request to upstream"
    );

    let target_response = client
        .request(method, target_url.to_string())
        .headers(outgoing_headers)
        .body(reqwest::Body::from(body_bytes))
        .timeout(request_timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                warn!(key.id = %key.id, timeout = ?request_timeout, "Upstream request timed out");
                AppError::UpstreamTimeout {
                    timeout_secs: Some(request_timeout.as_secs()),
                }
            } else {
                warn!(key.id = %key.id, error = %e, "Upstream request failed to send");
                AppError::from(e)
            }
        })?;

    let response_status = target_response.status();
    info!(status = %response_status, "Received response from upstream");

    let response_headers = build_response_headers(target_response.headers());

    let captured_status = response_status;
    let response_body_stream = target_response.bytes_stream().map_err(move |e| {
        warn!(status = %captured_status, error = %e, "Error reading upstream response body stream");
        AppError::internal(format!(
            "Upstream body stream error (status {captured_status}): {e}"
        ))
    });
    let body = Body::from_stream(response_body_stream);

    let mut client_response = Response::builder()
        .status(response_status)
        .body(body)
        .map_err(|e| AppError::internal(format!("Failed to construct client response: {e}")))?;

    *client_response.headers_mut() = response_headers;

    Ok(client_response)
}

/// Builds headers for the outgoing upstream request: hop-by-hop headers and
/// the inbound credential are dropped, the selected key's credential and the
/// target `Host` are set.
fn build_forward_headers(
    original_headers: &HeaderMap,
    key: &SelectedKey,
    target_host: Option<&str>,
) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(original_headers.len() + 2);
    copy_non_hop_by_hop_headers(original_headers, &mut filtered);
    add_auth_header(&mut filtered, key);
    add_host_header(&mut filtered, target_host);
    filtered
}

/// Builds headers for the response relayed to the original client.
fn build_response_headers(original_headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(original_headers.len());
    copy_non_hop_by_hop_headers(original_headers, &mut filtered);
    filtered
}

fn copy_non_hop_by_hop_headers(source: &HeaderMap, dest: &mut HeaderMap) {
    for (name, value) in source {
        let name_str = name.as_str().to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&name_str.as_str()) {
            trace!(header = %name, "Skipping hop-by-hop or auth header");
        } else {
            dest.insert(name.clone(), value.clone());
        }
    }
}

fn add_auth_header(headers: &mut HeaderMap, key: &SelectedKey) {
    let bearer = format!("Bearer {}", key.credential.expose_secret());
    match HeaderValue::from_str(&bearer) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Err(e) => {
            warn!(key.id = %key.id, error = %e, "Credential contains invalid header characters");
        }
    }
}

fn add_host_header(headers: &mut HeaderMap, target_host: Option<&str>) {
    if let Some(host) = target_host {
        match HeaderValue::from_str(host) {
            Ok(value) => {
                headers.insert(header::HOST, value);
            }
            Err(e) => {
                warn!(host = %host, error = %e, "Failed to set HOST header");
            }
        }
    } else {
        warn!("Target URL has no host, cannot set HOST header");
    }
}
