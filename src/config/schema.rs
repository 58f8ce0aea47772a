//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::load_balancer::backend::BackendNode;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request hardening limits.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Sticky session storage settings.
    pub sessions: SessionConfig,

    /// Admission control settings shared by all services.
    pub throttle: ThrottleConfig,

    /// Registered services and their backend nodes.
    pub services: Vec<ServiceConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent requests in flight (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Overall request deadline in seconds, failover attempts included.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Pretty for development, JSON for production.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Sticky session storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a sticky binding without traffic, in seconds.
    pub ttl_secs: u64,

    /// How often expired session and counter entries are purged.
    pub purge_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            purge_interval_secs: 60,
        }
    }
}

/// Admission control configuration shared by all services.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Header carrying the consumer identity when no auth layer attached one.
    pub consumer_header: String,

    /// Base URL of the policy oracle (e.g. "http://opa:8181").
    pub oracle_url: Option<String>,

    /// Bound on a single oracle call in milliseconds.
    pub oracle_timeout_ms: u64,

    /// Where admission decisions are published.
    pub events: EventSinkConfig,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            consumer_header: "x-consumer-id".to_string(),
            oracle_url: None,
            oracle_timeout_ms: 250,
            events: EventSinkConfig::default(),
        }
    }
}

/// Event publication target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventSinkKind {
    #[default]
    None,
    Log,
    Http,
}

/// Admission event sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventSinkConfig {
    pub kind: EventSinkKind,

    /// Collector base URL for the `http` kind.
    pub endpoint: Option<String>,

    /// Channel or topic name events are published to.
    pub topic: String,

    /// Events buffered locally before the oldest is dropped.
    pub buffer_capacity: usize,
}

impl Default for EventSinkConfig {
    fn default() -> Self {
        Self {
            kind: EventSinkKind::None,
            endpoint: None,
            topic: "gateway.admission".to_string(),
            buffer_capacity: 1024,
        }
    }
}

/// A registered service: how to match it and where to send it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service identifier; also the global throttle key.
    pub id: String,

    /// Host header to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Remove the matched path prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Ordered backend nodes. Order is part of sticky routing state.
    pub nodes: Vec<BackendNode>,

    #[serde(default)]
    pub load_balancing: LoadBalancingConfig,

    /// Absent means the service is not throttled.
    #[serde(default)]
    pub throttle: Option<ThrottlePolicy>,
}

/// Node selection behaviour for one service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancingConfig {
    /// Wrap to node 0 after the last node during failover.
    pub round_robin: bool,

    /// Retry a first-time session on the next node after a 5xx.
    pub failover: bool,

    /// Upper bound on attempts per request. Defaults to the node count.
    pub max_attempts: Option<u32>,

    /// Session affinity; `None` treats every request as new.
    pub sticky: Option<StickySessionConfig>,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            round_robin: true,
            failover: true,
            max_attempts: None,
            sticky: None,
        }
    }
}

/// Where the session affinity value is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionKeySource {
    #[default]
    Cookie,
    Header,
    Query,
}

/// Sticky session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StickySessionConfig {
    /// Cookie, header or query parameter name carrying the session value.
    pub param: String,

    #[serde(default)]
    pub source: SessionKeySource,
}

/// Per-service throttle policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThrottlePolicy {
    /// One shared counter for all callers of the service.
    #[serde(default)]
    pub global_enabled: bool,

    /// Calls admitted per window.
    pub limit: i64,

    /// Window length in milliseconds.
    pub window_ms: i64,

    /// Named policy the oracle evaluates for per-consumer limits.
    #[serde(default)]
    pub policy_ref: Option<String>,
}
