//! Upstream dispatch.
//!
//! # Responsibilities
//! - Hold a buffered, cloneable copy of the inbound request
//! - Send one attempt to one backend node
//!
//! # Design Decisions
//! - Every attempt gets its own `ProxyRequest` clone, so a failed attempt
//!   cannot leak partial effects into the response returned to the caller
//! - Responses are streamed back; only the request body is buffered

use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, Method, Request, StatusCode, Uri};
use axum::response::Response;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::load_balancer::backend::BackendNode;

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Buffered request, replayable across failover attempts.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path and query as forwarded (prefix stripping already applied).
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Response from a single backend attempt.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::empty(),
        }
    }

    /// Convert into an axum response, unmodified.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Why an attempt produced no response at all.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
    #[error("unsupported upstream scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("upstream request failed: {0}")]
    Request(String),
}

/// Sends one request attempt to one node.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(
        &self,
        node: &BackendNode,
        request: ProxyRequest,
    ) -> Result<UpstreamResponse, UpstreamError>;
}

/// Plain-HTTP upstream over a pooled hyper client.
#[derive(Clone)]
pub struct HyperUpstream {
    client: Client<HttpConnector, Body>,
}

impl HyperUpstream {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn send(
        &self,
        node: &BackendNode,
        request: ProxyRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        if node.scheme != "http" {
            return Err(UpstreamError::UnsupportedScheme(node.scheme.clone()));
        }

        let url = node
            .url_for(&request.path_and_query)
            .map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| UpstreamError::InvalidUrl(e.to_string()))?;

        let mut builder = Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (k, v) in request.headers.iter() {
                if *k == header::HOST || HOP_BY_HOP.contains(k) {
                    continue;
                }
                headers.append(k.clone(), v.clone());
            }
        }
        let req = builder
            .body(Body::from(request.body))
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let (parts, body) = response.into_parts();
        Ok(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body: Body::new(body),
        })
    }
}
