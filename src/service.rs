//! Registered service model consumed by the traffic-control plane.

use crate::config::schema::{LoadBalancingConfig, ServiceConfig, ThrottlePolicy};
use crate::load_balancer::backend::BackendNode;

/// A resolved service: identity, ordered nodes and traffic policy.
///
/// `generation` changes whenever the node list changes. Sticky records are
/// keyed by generation, so a bump invalidates every binding of the previous
/// node order without touching the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub nodes: Vec<BackendNode>,
    pub load_balancing: LoadBalancingConfig,
    pub throttle: Option<ThrottlePolicy>,
    /// Prefix removed from the request path before forwarding.
    pub strip_prefix: Option<String>,
    pub generation: u64,
}

impl Service {
    /// Build a service with default load balancing and no throttling.
    pub fn new(id: impl Into<String>, nodes: Vec<BackendNode>) -> Self {
        Self {
            id: id.into(),
            nodes,
            load_balancing: LoadBalancingConfig::default(),
            throttle: None,
            strip_prefix: None,
            generation: 0,
        }
    }

    pub fn from_config(config: &ServiceConfig, generation: u64) -> Self {
        let strip_prefix = if config.strip_prefix {
            config.path_prefix.clone()
        } else {
            None
        };
        Self {
            id: config.id.clone(),
            nodes: config.nodes.clone(),
            load_balancing: config.load_balancing.clone(),
            throttle: config.throttle.clone(),
            strip_prefix,
            generation,
        }
    }

    /// Attempts allowed per request: configured bound, else one per node.
    pub fn max_attempts(&self) -> usize {
        let bound = match self.load_balancing.max_attempts {
            Some(n) => n as usize,
            None => self.nodes.len(),
        };
        bound.max(1)
    }

    /// Rewrite an inbound path for forwarding, honouring `strip_prefix`.
    pub fn upstream_path(&self, path_and_query: &str) -> String {
        let Some(prefix) = self.strip_prefix.as_deref() else {
            return path_and_query.to_string();
        };
        match path_and_query.strip_prefix(prefix.trim_end_matches('/')) {
            Some(rest) if rest.is_empty() => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            Some(rest) if rest.starts_with('?') => format!("/{}", rest),
            _ => path_and_query.to_string(),
        }
    }
}
