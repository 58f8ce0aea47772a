//! Inbound request handling.
//!
//! # Responsibilities
//! - Read the request ID set by the outer layer
//! - Identify the consumer for per-consumer throttling
//! - Buffer the body once so failover attempts can replay it
//! - Add `X-Forwarded-*` headers for the backend

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, request::Parts, HeaderName, HeaderValue};

use crate::http::response::GatewayError;
use crate::load_balancer::ProxyRequest;

pub const X_REQUEST_ID: &str = "x-request-id";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Caller identity established by an authentication layer in front of the
/// proxy handler, e.g. the authorized party of a validated token.
///
/// Takes precedence over the consumer header when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerIdentity(pub String);

pub fn request_id(parts: &Parts) -> &str {
    parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Consumer key from the request extensions, else from `header_name`.
pub fn consumer_key(parts: &Parts, header_name: &HeaderName) -> Option<String> {
    if let Some(identity) = parts.extensions.get::<ConsumerIdentity>() {
        return Some(identity.0.clone());
    }
    parts
        .headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Buffer `body` and build the replayable request sent to backends.
pub async fn buffer_request(
    parts: &Parts,
    body: Body,
    path_and_query: String,
    max_body_size: usize,
    client: SocketAddr,
) -> Result<ProxyRequest, GatewayError> {
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max_body_size) {
        return Err(GatewayError::PayloadTooLarge { limit: max_body_size });
    }

    let bytes = axum::body::to_bytes(body, max_body_size).await.map_err(|e| {
        tracing::debug!(error = %e, "Failed to buffer request body");
        GatewayError::PayloadTooLarge { limit: max_body_size }
    })?;

    let mut request = ProxyRequest::new(parts.method.clone(), path_and_query);
    request.headers = parts.headers.clone();
    request.body = bytes;
    append_forwarded(&mut request, parts, client);
    Ok(request)
}

fn append_forwarded(request: &mut ProxyRequest, parts: &Parts, client: SocketAddr) {
    let ip = client.ip().to_string();
    let forwarded_for = match parts.headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        request.headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = parts.headers.get(header::HOST) {
        request.headers.insert(X_FORWARDED_HOST, host.clone());
    }
}
