//! Fixed-window admission control, global or per consumer.
//!
//! # Algorithm
//! ```text
//! key = service            (global_enabled)
//!     | service:consumer   (consumer identified)
//!
//! counter absent / expired (now >= start + window)  → fresh window, count = 1, admit
//! counter live, count <  limit                       → count += 1, admit
//! counter live, count >= limit                       → deny, retry after start + window - now
//! ```
//!
//! Per-consumer limits come from the service policy, or from the policy
//! oracle when the policy names one. The oracle is asked only when no
//! counter exists for the consumer; an expired counter keeps its limits.
//!
//! # Failure Semantics
//! - Oracle timeout, error or refusal: deny
//! - Store error on the oracle path: deny
//! - Store error on a static limit: admit

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ThrottlePolicy;
use crate::observability::metrics;
use crate::security::events::{AdmissionEvent, EventSink};
use crate::security::policy::PolicyOracle;
use crate::service::Service;
use crate::store::{StoreError, TtlStore};

/// Extra lifetime granted to counters past their window, so oracle limits
/// stay cached across idle gaps.
const COUNTER_RETENTION: Duration = Duration::from_secs(300);

/// Per-key fixed-window state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleCounter {
    pub key: String,
    pub consumer_key: Option<String>,
    pub limit: i64,
    pub window_duration_ms: i64,
    pub window_start_ms: i64,
    pub count: i64,
}

impl ThrottleCounter {
    fn fresh(key: &str, consumer_key: Option<&str>, limits: Limits, now_ms: i64) -> Self {
        Self {
            key: key.to_string(),
            consumer_key: consumer_key.map(str::to_string),
            limit: limits.limit,
            window_duration_ms: limits.window_ms,
            window_start_ms: now_ms,
            count: 1,
        }
    }

    pub fn window_end_ms(&self) -> i64 {
        self.window_start_ms.saturating_add(self.window_duration_ms)
    }

    /// True while `now_ms` falls inside the counter's window.
    pub fn is_live(&self, now_ms: i64) -> bool {
        now_ms < self.window_end_ms()
    }

    fn limits(&self) -> Limits {
        Limits {
            limit: self.limit,
            window_ms: self.window_duration_ms,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Milliseconds until the caller may retry; zero when admitted.
    pub retry_after_ms: i64,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_ms: 0,
        }
    }

    pub fn deny(retry_after_ms: i64) -> Self {
        Self {
            allowed: false,
            retry_after_ms: retry_after_ms.max(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Limits {
    limit: i64,
    window_ms: i64,
}

impl From<&ThrottlePolicy> for Limits {
    fn from(policy: &ThrottlePolicy) -> Self {
        Self {
            limit: policy.limit,
            window_ms: policy.window_ms,
        }
    }
}

/// Everything one check needs to know about its key.
struct Subject<'a> {
    service: &'a Service,
    policy: &'a ThrottlePolicy,
    key: String,
    consumer_key: Option<&'a str>,
}

impl Subject<'_> {
    /// Limits are delegated to the oracle only for identified consumers.
    fn policy_ref(&self) -> Option<&str> {
        self.consumer_key.and(self.policy.policy_ref.as_deref())
    }
}

/// Decides whether a request may proceed to the backend selector.
pub struct AdmissionController {
    counters: Arc<dyn TtlStore<ThrottleCounter>>,
    clock: Arc<dyn Clock>,
    oracle: Option<Arc<dyn PolicyOracle>>,
    oracle_timeout: Duration,
    events: Option<Arc<dyn EventSink>>,
}

impl AdmissionController {
    pub fn new(counters: Arc<dyn TtlStore<ThrottleCounter>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            counters,
            clock,
            oracle: None,
            oracle_timeout: Duration::from_millis(250),
            events: None,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn PolicyOracle>, timeout: Duration) -> Self {
        self.oracle = Some(oracle);
        self.oracle_timeout = timeout;
        self
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Admit or reject one request for `service`.
    ///
    /// Services without a throttle policy are never limited. A non-global
    /// policy with no identifiable consumer is not limited either.
    pub async fn check_and_admit(&self, service: &Service, consumer_key: Option<&str>) -> Decision {
        let Some(policy) = service.throttle.as_ref() else {
            return Decision::allow();
        };

        let subject = if policy.global_enabled {
            Subject {
                service,
                policy,
                key: service.id.clone(),
                consumer_key: None,
            }
        } else if let Some(consumer) = consumer_key {
            Subject {
                service,
                policy,
                key: format!("{}:{}", service.id, consumer),
                consumer_key: Some(consumer),
            }
        } else {
            tracing::trace!(service = %service.id, "No consumer identity, per-consumer throttle skipped");
            return Decision::allow();
        };

        let now = self.clock.now_ms();

        let existing = match self.counters.get(&subject.key).await {
            Ok(counter) => counter,
            Err(e) => return self.on_store_error(&subject, now, e),
        };

        let limits = match (subject.policy_ref(), &existing) {
            (None, _) => Limits::from(policy),
            (Some(_), Some(counter)) => counter.limits(),
            (Some(policy_ref), None) => match self.consult_oracle(&subject, policy_ref).await {
                Some(limits) => limits,
                None => {
                    let decision = Decision::deny(policy.window_ms);
                    self.finish(&subject, decision, None, now);
                    return decision;
                }
            },
        };

        let ttl = Duration::from_millis(u64::try_from(limits.window_ms).unwrap_or(0))
            .saturating_add(COUNTER_RETENTION);

        let mut outcome: Option<(Decision, ThrottleCounter)> = None;
        let result = self
            .counters
            .update(&subject.key, ttl, &mut |current| match current {
                Some(counter) if counter.is_live(now) => {
                    if counter.count < counter.limit {
                        let mut next = counter.clone();
                        next.count = next.count.saturating_add(1);
                        outcome = Some((Decision::allow(), next.clone()));
                        Some(next)
                    } else {
                        let decision = Decision::deny(counter.window_end_ms() - now);
                        outcome = Some((decision, counter.clone()));
                        None
                    }
                }
                _ => {
                    let fresh = ThrottleCounter::fresh(&subject.key, subject.consumer_key, limits, now);
                    outcome = Some((Decision::allow(), fresh.clone()));
                    Some(fresh)
                }
            })
            .await;

        if let Err(e) = result {
            return self.on_store_error(&subject, now, e);
        }
        let Some((decision, counter)) = outcome else {
            return self.on_store_error(
                &subject,
                now,
                StoreError::Unavailable("counter update was not applied".into()),
            );
        };

        self.finish(&subject, decision, Some(&counter), now);
        decision
    }

    /// Ask the oracle for limits; `None` means deny.
    async fn consult_oracle(&self, subject: &Subject<'_>, policy_ref: &str) -> Option<Limits> {
        let consumer = subject.consumer_key?;
        let Some(oracle) = self.oracle.as_ref() else {
            tracing::warn!(
                service = %subject.service.id,
                policy = %policy_ref,
                "Policy oracle not configured, denying"
            );
            return None;
        };

        let verdict = match tokio::time::timeout(self.oracle_timeout, oracle.evaluate(policy_ref, consumer)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                tracing::warn!(service = %subject.service.id, consumer = %consumer, error = %e, "Policy oracle failed, denying");
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    service = %subject.service.id,
                    consumer = %consumer,
                    timeout_ms = self.oracle_timeout.as_millis() as u64,
                    "Policy oracle timed out, denying"
                );
                return None;
            }
        };

        match verdict.limits() {
            Some((limit, window_ms)) => Some(Limits { limit, window_ms }),
            None => {
                tracing::debug!(service = %subject.service.id, consumer = %consumer, ?verdict, "Policy oracle refused consumer");
                None
            }
        }
    }

    fn on_store_error(&self, subject: &Subject<'_>, now: i64, error: StoreError) -> Decision {
        let decision = if subject.policy_ref().is_some() {
            tracing::error!(service = %subject.service.id, key = %subject.key, error = %error, "Throttle store failed on policy path, denying");
            Decision::deny(subject.policy.window_ms)
        } else {
            tracing::error!(service = %subject.service.id, key = %subject.key, error = %error, "Throttle store failed, admitting");
            Decision::allow()
        };
        self.finish(subject, decision, None, now);
        decision
    }

    fn finish(&self, subject: &Subject<'_>, decision: Decision, counter: Option<&ThrottleCounter>, now: i64) {
        metrics::record_admission(&subject.service.id, decision.allowed);

        if decision.allowed {
            tracing::debug!(
                service = %subject.service.id,
                key = %subject.key,
                count = counter.map(|c| c.count).unwrap_or(0),
                "Request admitted"
            );
        } else {
            tracing::info!(
                service = %subject.service.id,
                key = %subject.key,
                retry_after_ms = decision.retry_after_ms,
                "Request throttled"
            );
        }

        let Some(sink) = self.events.as_ref() else {
            return;
        };
        sink.publish(AdmissionEvent {
            event_id: Uuid::new_v4(),
            service_id: subject.service.id.clone(),
            consumer_key: subject.consumer_key.map(str::to_string),
            allowed: decision.allowed,
            count: counter.map(|c| c.count).unwrap_or(0),
            limit: counter.map(|c| c.limit).unwrap_or(subject.policy.limit),
            window_start_ms: counter.map(|c| c.window_start_ms).unwrap_or(now),
            timestamp_ms: now,
        });
    }
}
