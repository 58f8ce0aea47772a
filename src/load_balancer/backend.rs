//! Backend node description.
//!
//! # Responsibilities
//! - Represent a single proxy target of a service
//! - Build the upstream URL for a forwarded path
//!
//! Node lists are ordered. An index into a service's list is persisted as
//! sticky routing state, so the list must not be reordered within one
//! service generation.

use serde::{Deserialize, Serialize};
use url::Url;

/// One proxy target for a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BackendNode {
    pub host: String,
    pub port: u16,
    /// Path prepended to every forwarded request (e.g. "/v2").
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_scheme() -> String {
    "http".to_string()
}

impl BackendNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            base_path: String::new(),
            scheme: default_scheme(),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// `host:port`, for logs and metric labels.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Join `path_and_query` onto this node's base URL.
    pub fn url_for(&self, path_and_query: &str) -> Result<Url, url::ParseError> {
        let base = self.base_path.trim_end_matches('/');
        let tail = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{}", path_and_query)
        };
        Url::parse(&format!(
            "{}://{}:{}{}{}",
            self.scheme, self.host, self.port, base, tail
        ))
    }
}

impl std::fmt::Display for BackendNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}{}", self.scheme, self.host, self.port, self.base_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_joins_base_path() {
        let node = BackendNode::new("10.0.0.5", 8080).with_base_path("/v2/");
        let url = node.url_for("/orders?id=7").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5:8080/v2/orders?id=7");
    }

    #[test]
    fn test_url_for_without_base_path() {
        let node = BackendNode::new("localhost", 3000);
        assert_eq!(node.url_for("health").unwrap().as_str(), "http://localhost:3000/health");
        assert_eq!(node.authority(), "localhost:3000");
    }

    #[test]
    fn test_defaults_from_toml() {
        let node: BackendNode = toml::from_str("host = \"a\"\nport = 1").unwrap();
        assert_eq!(node.scheme, "http");
        assert_eq!(node.base_path, "");
    }
}
