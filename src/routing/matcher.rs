//! Request matching conditions.
//!
//! - Host matching is case-insensitive and ignores the port
//! - Path prefixes match whole segments: `/api` matches `/api` and
//!   `/api/v1`, not `/apiv2`
//! - An `AndMatcher` with no conditions matches everything

use axum::http::{header, request::Parts};

/// A single condition evaluated against a request head.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    fn matches(&self, parts: &Parts) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, parts: &Parts) -> bool {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| parts.uri.host());
        let Some(host) = host else {
            return false;
        };
        let name = host.rsplit_once(':').map_or(host, |(name, port)| {
            if port.chars().all(|c| c.is_ascii_digit()) {
                name
            } else {
                host
            }
        });
        name.eq_ignore_ascii_case(&self.expected_host)
    }
}

/// Matches a path prefix on segment boundaries.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: trimmed.to_string(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, parts: &Parts) -> bool {
        let path = parts.uri.path();
        if self.prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }

    /// Number of conditions; more conditions means a more specific route.
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, parts: &Parts) -> bool {
        self.matchers.iter().all(|m| m.matches(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn head(host: Option<&str>, uri: &str) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header("Host", host);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("api.example.com");

        assert!(matcher.matches(&head(Some("api.example.com"), "/")));
        assert!(matcher.matches(&head(Some("API.EXAMPLE.COM"), "/")));
        assert!(matcher.matches(&head(Some("api.example.com:8080"), "/")));
        assert!(!matcher.matches(&head(Some("other.com"), "/")));
        assert!(!matcher.matches(&head(None, "/")));
    }

    #[test]
    fn test_path_matcher_respects_segments() {
        let matcher = PathPrefixMatcher::new("/api/");

        assert!(matcher.matches(&head(None, "/api")));
        assert!(matcher.matches(&head(None, "/api/v1?x=1")));
        assert!(!matcher.matches(&head(None, "/apiv2")));
        assert!(!matcher.matches(&head(None, "/images")));
    }

    #[test]
    fn test_and_matcher() {
        let matcher = AndMatcher::new(vec![
            Box::new(HostMatcher::new("shop.local")),
            Box::new(PathPrefixMatcher::new("/cart")),
        ]);
        assert_eq!(matcher.len(), 2);
        assert!(matcher.matches(&head(Some("shop.local"), "/cart/1")));
        assert!(!matcher.matches(&head(Some("shop.local"), "/orders")));

        assert!(AndMatcher::default().matches(&head(None, "/anything")));
    }
}
