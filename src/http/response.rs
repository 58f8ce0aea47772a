//! Gateway-generated responses.
//!
//! Backend responses pass through untouched, including exhausted failover.
//! Everything below is produced only when no backend answered or the
//! request never reached one.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::load_balancer::SelectorError;

pub const X_RATELIMIT_RETRY_AFTER_MS: &str = "x-ratelimit-retry-after-ms";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no service matches the request")]
    NoRoute,
    #[error("rate limit exceeded, retry after {retry_after_ms} ms")]
    Throttled { retry_after_ms: i64 },
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("service '{0}' has no backend nodes")]
    NoBackends(String),
    #[error("no backend responded: {0}")]
    BadGateway(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoRoute => StatusCode::NOT_FOUND,
            Self::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NoBackends(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<SelectorError> for GatewayError {
    fn from(err: SelectorError) -> Self {
        match err {
            SelectorError::NoBackends(service) => Self::NoBackends(service),
            other @ SelectorError::Upstream { .. } => Self::BadGateway(other.to_string()),
        }
    }
}

/// Whole seconds, rounded up, for the `Retry-After` header.
fn retry_after_secs(retry_after_ms: i64) -> i64 {
    let ms = retry_after_ms.max(0);
    ms / 1000 + i64::from(ms % 1000 != 0)
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), self.to_string()).into_response();
        if let Self::Throttled { retry_after_ms } = self {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after_ms)));
            headers.insert(X_RATELIMIT_RETRY_AFTER_MS, HeaderValue::from(retry_after_ms.max(0)));
        }
        response
    }
}
