//! Session affinity bookkeeping.
//!
//! # Responsibilities
//! - Extract the session value from a cookie, header or query parameter
//! - Parse affinity updates from backend `Set-Cookie` headers
//! - Define the persisted `StickySessionRecord` and its store key
//!
//! # Design Decisions
//! - Absence of a value means "no affinity requested"
//! - Store keys embed the service generation; bumping it orphans old bindings

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};

use crate::config::schema::{SessionKeySource, StickySessionConfig};

/// Binding of one session to a node index of its service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickySessionRecord {
    /// `param=value` as sent by the client.
    pub session_key: String,
    pub node_index: usize,
    /// Latest affinity value; replaced when the backend issues a new one.
    pub value: String,
}

impl StickySessionRecord {
    pub fn new(session_key: impl Into<String>, node_index: usize, value: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            node_index,
            value: value.into(),
        }
    }
}

/// Build the session key for a parameter name and its value.
pub fn session_key(param: &str, value: &str) -> String {
    format!("{}={}", param, value)
}

/// Namespaced store key for a session of one service generation.
pub fn store_key(service_id: &str, generation: u64, session_key: &str) -> String {
    format!("sticky:{}:{}:{}", service_id, generation, session_key)
}

/// Read the session key for this request, if the client sent one.
pub fn extract_session_key(
    config: &StickySessionConfig,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Option<String> {
    let value = match config.source {
        SessionKeySource::Cookie => cookie_value(headers, &config.param),
        SessionKeySource::Header => headers
            .get(config.param.as_str())
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string()),
        SessionKeySource::Query => query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == config.param.as_str())
                .map(|(_, v)| v.into_owned())
        }),
    }?;

    if value.is_empty() {
        None
    } else {
        Some(session_key(&config.param, &value))
    }
}

/// Value of cookie `name` across all `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
}

/// Affinity value a backend assigned via `Set-Cookie: name=value; ...`.
///
/// When several headers set the same cookie the last one wins, matching
/// browser behaviour.
pub fn affinity_from_set_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|raw| raw.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(k, v)| k.trim() == name && !v.trim().is_empty())
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .last()
}
