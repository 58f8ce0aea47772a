//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (policy refs need an oracle)
//! - Validate value ranges (limits > 0, ports valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use crate::config::schema::{EventSinkKind, GatewayConfig, ServiceConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("service id must not be empty")]
    EmptyServiceId,
    #[error("service id '{0}' must not contain ':'")]
    InvalidServiceId(String),
    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),
    #[error("service '{0}' has no backend nodes")]
    NoNodes(String),
    #[error("service '{service}' node {index}: {reason}")]
    InvalidNode {
        service: String,
        index: usize,
        reason: String,
    },
    #[error("service '{0}' enables sticky sessions without a key parameter")]
    MissingStickyParam(String),
    #[error("service '{0}' has max_attempts = 0")]
    ZeroAttempts(String),
    #[error("service '{service}' throttle: {reason}")]
    InvalidThrottle { service: String, reason: String },
    #[error("service '{0}' references a policy but throttle.oracle_url is not set")]
    MissingOracle(String),
    #[error("throttle.events: {0}")]
    InvalidEventSink(String),
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for service in &config.services {
        if service.id.trim().is_empty() {
            errors.push(ValidationError::EmptyServiceId);
        } else if service.id.contains(':') {
            // ':' separates the service id from the consumer in counter keys
            errors.push(ValidationError::InvalidServiceId(service.id.clone()));
        } else if !seen.insert(service.id.as_str()) {
            errors.push(ValidationError::DuplicateService(service.id.clone()));
        }
        validate_service(service, config.throttle.oracle_url.is_some(), &mut errors);
    }

    let events = &config.throttle.events;
    if events.kind == EventSinkKind::Http && events.endpoint.is_none() {
        errors.push(ValidationError::InvalidEventSink(
            "kind = \"http\" requires an endpoint".into(),
        ));
    }
    if events.kind != EventSinkKind::None && events.buffer_capacity == 0 {
        errors.push(ValidationError::InvalidEventSink(
            "buffer_capacity must be at least 1".into(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(service: &ServiceConfig, has_oracle: bool, errors: &mut Vec<ValidationError>) {
    let id = &service.id;

    if service.nodes.is_empty() {
        errors.push(ValidationError::NoNodes(id.clone()));
    }
    for (index, node) in service.nodes.iter().enumerate() {
        let reason = if node.host.trim().is_empty() {
            Some("host is empty".to_string())
        } else if node.port == 0 {
            Some("port must be non-zero".to_string())
        } else if node.scheme != "http" {
            Some(format!("unsupported scheme '{}', only http backends are supported", node.scheme))
        } else {
            None
        };
        if let Some(reason) = reason {
            errors.push(ValidationError::InvalidNode {
                service: id.clone(),
                index,
                reason,
            });
        }
    }

    let lb = &service.load_balancing;
    if let Some(sticky) = &lb.sticky {
        if sticky.param.trim().is_empty() {
            errors.push(ValidationError::MissingStickyParam(id.clone()));
        }
    }
    if lb.max_attempts == Some(0) {
        errors.push(ValidationError::ZeroAttempts(id.clone()));
    }

    if let Some(policy) = &service.throttle {
        if policy.limit <= 0 {
            errors.push(ValidationError::InvalidThrottle {
                service: id.clone(),
                reason: format!("limit must be positive, got {}", policy.limit),
            });
        }
        if policy.window_ms <= 0 {
            errors.push(ValidationError::InvalidThrottle {
                service: id.clone(),
                reason: format!("window_ms must be positive, got {}", policy.window_ms),
            });
        }
        if policy.policy_ref.is_some() && !has_oracle {
            errors.push(ValidationError::MissingOracle(id.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{StickySessionConfig, ThrottlePolicy};
    use crate::load_balancer::backend::BackendNode;

    fn service(id: &str) -> ServiceConfig {
        ServiceConfig {
            id: id.to_string(),
            host: None,
            path_prefix: Some("/".into()),
            priority: 0,
            strip_prefix: false,
            nodes: vec![BackendNode::new("127.0.0.1", 9000)],
            load_balancing: Default::default(),
            throttle: None,
        }
    }

    #[test]
    fn test_valid_config() {
        let mut config = GatewayConfig::default();
        config.services.push(service("a"));
        config.services.push(service("b"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();

        let mut broken = service("a");
        broken.nodes.push(BackendNode::new("", 0));
        broken.load_balancing.sticky = Some(StickySessionConfig {
            param: " ".into(),
            source: Default::default(),
        });
        broken.load_balancing.max_attempts = Some(0);
        broken.throttle = Some(ThrottlePolicy {
            global_enabled: false,
            limit: 0,
            window_ms: -5,
            policy_ref: Some("p".into()),
        });
        config.services.push(broken);
        config.services.push(service("a"));

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateService("a".into())));
        assert!(errors.contains(&ValidationError::MissingStickyParam("a".into())));
        assert!(errors.contains(&ValidationError::ZeroAttempts("a".into())));
        assert!(errors.contains(&ValidationError::MissingOracle("a".into())));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidNode { index: 1, .. })));
        let throttle_errors = errors
            .iter()
            .filter(|e| matches!(e, ValidationError::InvalidThrottle { .. }))
            .count();
        assert_eq!(throttle_errors, 2);
    }

    #[test]
    fn test_service_id_with_separator_is_rejected() {
        let mut config = GatewayConfig::default();
        config.services.push(service("api"));
        config.services.push(service("api:v2"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::InvalidServiceId("api:v2".into())]);
    }

    #[test]
    fn test_policy_ref_with_oracle_is_valid() {
        let mut config = GatewayConfig::default();
        config.throttle.oracle_url = Some("http://opa:8181".into());
        let mut svc = service("a");
        svc.throttle = Some(ThrottlePolicy {
            global_enabled: false,
            limit: 10,
            window_ms: 1000,
            policy_ref: Some("gateway/limits".into()),
        });
        config.services.push(svc);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_http_sink_needs_endpoint() {
        let mut config = GatewayConfig::default();
        config.throttle.events.kind = EventSinkKind::Http;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ValidationError::InvalidEventSink(_)));
    }
}
