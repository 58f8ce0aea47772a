//! Policy oracle client.
//!
//! # Responsibilities
//! - Ask an external policy engine for a consumer's limit
//! - Normalise the answer into "deny" or concrete `(limit, window)`
//!
//! # Design Decisions
//! - Consulted only when no counter exists for the consumer
//! - Every call is bounded by a timeout; the caller treats any error as deny
//! - Wire format follows the OPA data API: `POST /v1/data/<policy>` with
//!   `{"input": {...}}`, answer in `{"result": {...}}`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Oracle answer for one consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub window_duration_ms: Option<i64>,
}

impl PolicyVerdict {
    pub fn allow(limit: i64, window_duration_ms: i64) -> Self {
        Self {
            allowed: true,
            limit: Some(limit),
            window_duration_ms: Some(window_duration_ms),
        }
    }

    pub fn deny() -> Self {
        Self {
            allowed: false,
            limit: None,
            window_duration_ms: None,
        }
    }

    /// `(limit, window_ms)` when the verdict admits with usable limits.
    ///
    /// Missing, zero or negative values count as a denial.
    pub fn limits(&self) -> Option<(i64, i64)> {
        if !self.allowed {
            return None;
        }
        match (self.limit, self.window_duration_ms) {
            (Some(limit), Some(window)) if limit > 0 && window > 0 => Some((limit, window)),
            _ => None,
        }
    }
}

/// Why the oracle could not answer.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("policy oracle timed out after {0:?}")]
    Timeout(Duration),
    #[error("policy oracle transport error: {0}")]
    Transport(String),
    #[error("policy oracle returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// External decision service for per-consumer limits.
#[async_trait]
pub trait PolicyOracle: Send + Sync {
    async fn evaluate(&self, policy_ref: &str, consumer_key: &str) -> Result<PolicyVerdict, OracleError>;
}

#[derive(Serialize)]
struct OracleInput<'a> {
    consumer_key: &'a str,
}

#[derive(Serialize)]
struct OracleRequest<'a> {
    input: OracleInput<'a>,
}

#[derive(Deserialize)]
struct OracleResponse {
    result: Option<PolicyVerdict>,
}

/// Oracle reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPolicyOracle {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpPolicyOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url_for(&self, policy_ref: &str) -> String {
        format!("{}/v1/data/{}", self.base_url, policy_ref.trim_start_matches('/'))
    }
}

#[async_trait]
impl PolicyOracle for HttpPolicyOracle {
    async fn evaluate(&self, policy_ref: &str, consumer_key: &str) -> Result<PolicyVerdict, OracleError> {
        let body = OracleRequest {
            input: OracleInput { consumer_key },
        };

        let response = self
            .client
            .post(self.url_for(policy_ref))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.timeout)
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::InvalidResponse(format!("status {}", status)));
        }

        let parsed: OracleResponse = response
            .json()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        parsed
            .result
            .ok_or_else(|| OracleError::InvalidResponse("missing result".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_limits() {
        assert_eq!(PolicyVerdict::allow(10, 1000).limits(), Some((10, 1000)));
        assert_eq!(PolicyVerdict::deny().limits(), None);

        let negative = PolicyVerdict::allow(-1, 1000);
        assert_eq!(negative.limits(), None);

        let missing_window = PolicyVerdict {
            allowed: true,
            limit: Some(5),
            window_duration_ms: None,
        };
        assert_eq!(missing_window.limits(), None);
    }

    #[test]
    fn test_response_parsing() {
        let parsed: OracleResponse = serde_json::from_str(
            r#"{"result": {"allowed": true, "limit": 20, "window_duration_ms": 60000}}"#,
        )
        .unwrap();
        assert_eq!(parsed.result, Some(PolicyVerdict::allow(20, 60_000)));

        let undefined: OracleResponse = serde_json::from_str("{}").unwrap();
        assert!(undefined.result.is_none());
    }

    #[test]
    fn test_request_body_shape() {
        let body = OracleRequest {
            input: OracleInput { consumer_key: "app-1" },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"input": {"consumer_key": "app-1"}})
        );
    }

    #[test]
    fn test_url_for() {
        let oracle = HttpPolicyOracle::new("http://opa:8181/", Duration::from_millis(100)).unwrap();
        assert_eq!(oracle.url_for("gateway/limits"), "http://opa:8181/v1/data/gateway/limits");
    }

    #[tokio::test]
    async fn test_unreachable_oracle_is_an_error() {
        let oracle = HttpPolicyOracle::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        assert!(oracle.evaluate("p", "c").await.is_err());
    }
}
