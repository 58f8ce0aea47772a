//! Sticky, failover-aware backend selection.
//!
//! # State Machine
//! ```text
//! select ──▶ record found?  ── yes ─▶ index = record.node_index, established
//!               │
//!               no ─▶ index = round-robin ticket, first-time
//!
//! report(status):
//!   non-5xx                 → persist record, done
//!   5xx, established        → delete record, return response as-is
//!   5xx, first-time         → next index (wrap only with round_robin),
//!                             retry while attempts < max_attempts
//!   no next index / budget  → return last response
//! ```
//!
//! # Design Decisions
//! - No lock is held across a backend call; only the per-service counter is shared
//! - Store failures degrade to "new session" rather than failing the request
//! - The selector never fabricates a response
//! - Dropping the `forward` future (request cancelled or timed out) abandons
//!   pending attempts; persistence happens only after a terminal outcome

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use dashmap::DashMap;

use crate::load_balancer::backend::BackendNode;
use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::sticky::{self, StickySessionRecord};
use crate::load_balancer::upstream::{ProxyRequest, Upstream, UpstreamError, UpstreamResponse};
use crate::observability::metrics;
use crate::service::Service;
use crate::store::TtlStore;

/// Errors that leave the selector without any backend response.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("service '{0}' has no backend nodes")]
    NoBackends(String),
    #[error("backend {node} unreachable: {source}")]
    Upstream {
        node: String,
        #[source]
        source: UpstreamError,
    },
}

/// In-flight selection state for one request.
#[derive(Debug, Clone)]
pub struct SelectionHandle {
    service_id: String,
    generation: u64,
    store_key: Option<String>,
    record: Option<StickySessionRecord>,
    index: usize,
    first_time: bool,
    attempt: usize,
    max_attempts: usize,
    node_count: usize,
    round_robin: bool,
    failover: bool,
}

impl SelectionHandle {
    /// Node index to dispatch the current attempt to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// True when no sticky record existed for this session.
    pub fn is_first_time(&self) -> bool {
        self.first_time
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// The record that will be persisted on success.
    pub fn record(&self) -> Option<&StickySessionRecord> {
        self.record.as_ref()
    }
}

/// Terminal result of a selection sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Non-5xx response; the session binding was persisted (if any).
    Bound,
    /// Established session failed; its binding was removed.
    Evicted,
    /// Failover stopped: attempt budget or node list exhausted.
    Exhausted,
}

/// What the caller does after reporting an attempt.
#[derive(Debug)]
pub enum Next {
    Retry(SelectionHandle),
    Done(Outcome),
}

/// Final response of a `forward` call.
#[derive(Debug)]
pub struct Forwarded {
    pub response: UpstreamResponse,
    pub node_index: usize,
    pub attempts: usize,
    pub outcome: Outcome,
}

/// Selects backend nodes with session affinity and first-failure failover.
pub struct BackendSelector {
    sessions: Arc<dyn TtlStore<StickySessionRecord>>,
    session_ttl: Duration,
    counters: DashMap<String, Arc<RoundRobin>>,
}

impl BackendSelector {
    pub fn new(sessions: Arc<dyn TtlStore<StickySessionRecord>>, session_ttl: Duration) -> Self {
        Self {
            sessions,
            session_ttl,
            counters: DashMap::new(),
        }
    }

    fn counter(&self, service_id: &str) -> Arc<RoundRobin> {
        if let Some(existing) = self.counters.get(service_id) {
            return existing.clone();
        }
        self.counters
            .entry(service_id.to_string())
            .or_default()
            .clone()
    }

    /// Choose the node for the first attempt.
    ///
    /// Returns `None` when `nodes` is empty.
    pub async fn select(
        &self,
        service: &Service,
        nodes: &[BackendNode],
        session_key: Option<&str>,
    ) -> Option<SelectionHandle> {
        if nodes.is_empty() {
            return None;
        }

        let store_key =
            session_key.map(|k| sticky::store_key(&service.id, service.generation, k));

        let existing = match &store_key {
            Some(key) => match self.sessions.get(key).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(
                        service = %service.id,
                        error = %e,
                        "Session store read failed, treating as new session"
                    );
                    None
                }
            },
            None => None,
        };

        let existing = existing.filter(|record| {
            let in_range = record.node_index < nodes.len();
            if !in_range {
                tracing::debug!(
                    service = %service.id,
                    node_index = record.node_index,
                    node_count = nodes.len(),
                    "Sticky record points past node list, reselecting"
                );
            }
            in_range
        });

        let (index, first_time, record) = match existing {
            Some(record) => (record.node_index, false, Some(record)),
            None => {
                let index = self.counter(&service.id).next_index(nodes.len())?;
                let record = session_key
                    .map(|k| StickySessionRecord::new(k, index, session_value(k)));
                (index, true, record)
            }
        };

        Some(SelectionHandle {
            service_id: service.id.clone(),
            generation: service.generation,
            store_key,
            record,
            index,
            first_time,
            attempt: 1,
            max_attempts: service.max_attempts(),
            node_count: nodes.len(),
            round_robin: service.load_balancing.round_robin,
            failover: service.load_balancing.failover,
        })
    }

    /// Record the outcome of an attempt that produced a response.
    pub async fn report(
        &self,
        mut handle: SelectionHandle,
        status: StatusCode,
        affinity: Option<String>,
    ) -> Next {
        if let (Some(value), Some(record)) = (affinity, handle.record.as_mut()) {
            record.value = value;
        }

        if status.is_server_error() {
            self.on_failure(handle).await
        } else {
            self.persist(&handle).await;
            Next::Done(Outcome::Bound)
        }
    }

    /// Record an attempt that failed before any response arrived.
    pub async fn report_unreachable(&self, handle: SelectionHandle) -> Next {
        self.on_failure(handle).await
    }

    async fn on_failure(&self, mut handle: SelectionHandle) -> Next {
        if !handle.first_time {
            if let Some(key) = &handle.store_key {
                if let Err(e) = self.sessions.remove(key).await {
                    tracing::warn!(service = %handle.service_id, error = %e, "Failed to drop sticky session");
                }
                tracing::info!(
                    service = %handle.service_id,
                    node_index = handle.index,
                    "Established session hit a failing backend, binding dropped"
                );
                metrics::record_sticky_eviction(&handle.service_id);
            }
            return Next::Done(Outcome::Evicted);
        }

        if !handle.failover || handle.attempt >= handle.max_attempts {
            return Next::Done(Outcome::Exhausted);
        }

        let next = handle.index + 1;
        let next = if next < handle.node_count {
            next
        } else if handle.round_robin {
            0
        } else {
            return Next::Done(Outcome::Exhausted);
        };

        tracing::debug!(
            service = %handle.service_id,
            from = handle.index,
            to = next,
            attempt = handle.attempt + 1,
            "Failing over"
        );
        metrics::record_failover(&handle.service_id);

        handle.index = next;
        handle.attempt += 1;
        if let Some(record) = handle.record.as_mut() {
            record.node_index = next;
        }
        Next::Retry(handle)
    }

    /// Store the binding for a successful attempt.
    ///
    /// A first-time binding is only inserted when no live record exists; if a
    /// concurrent request bound the session first, that binding wins.
    async fn persist(&self, handle: &SelectionHandle) {
        let (Some(key), Some(record)) = (&handle.store_key, &handle.record) else {
            return;
        };

        let bound = if handle.first_time {
            let mut bound = record.node_index;
            let result = self
                .sessions
                .update(key, self.session_ttl, &mut |current| match current {
                    Some(existing) if existing.node_index < handle.node_count => {
                        bound = existing.node_index;
                        None
                    }
                    _ => Some(record.clone()),
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(service = %handle.service_id, error = %e, "Failed to persist sticky session");
                return;
            }
            if bound != record.node_index {
                tracing::debug!(
                    service = %handle.service_id,
                    node_index = record.node_index,
                    bound_index = bound,
                    "Session already bound by a concurrent request"
                );
                return;
            }
            bound
        } else {
            if let Err(e) = self.sessions.put(key, record.clone(), self.session_ttl).await {
                tracing::warn!(service = %handle.service_id, error = %e, "Failed to persist sticky session");
                return;
            }
            record.node_index
        };

        // The backend issued a new affinity value: bind it too, so clients that
        // adopt the new cookie land on the same node.
        if record.value != session_value(&record.session_key) {
            let param = session_param(&record.session_key);
            let alias_key = sticky::session_key(param, &record.value);
            let alias = StickySessionRecord::new(&alias_key, bound, &record.value);
            let store_key = sticky::store_key(&handle.service_id, handle.generation, &alias_key);
            if let Err(e) = self.sessions.put(&store_key, alias, self.session_ttl).await {
                tracing::warn!(service = %handle.service_id, error = %e, "Failed to persist affinity alias");
            }
        }
    }

    /// Drive selection, dispatch and failover to a terminal outcome.
    pub async fn forward<U>(
        &self,
        service: &Service,
        nodes: &[BackendNode],
        session_key: Option<&str>,
        request: &ProxyRequest,
        upstream: &U,
    ) -> Result<Forwarded, SelectorError>
    where
        U: Upstream + ?Sized,
    {
        let mut handle = self
            .select(service, nodes, session_key)
            .await
            .ok_or_else(|| SelectorError::NoBackends(service.id.clone()))?;

        let affinity_param = service
            .load_balancing
            .sticky
            .as_ref()
            .map(|s| s.param.as_str());
        let mut last: Option<(UpstreamResponse, usize)> = None;

        loop {
            let index = handle.index;
            let attempts = handle.attempt;
            let node = &nodes[index];

            tracing::debug!(
                service = %service.id,
                node = %node,
                node_index = index,
                attempt = attempts,
                first_time = handle.first_time,
                "Dispatching to backend"
            );

            match upstream.send(node, request.clone()).await {
                Ok(response) => {
                    let status = response.status;
                    let affinity =
                        affinity_param.and_then(|p| sticky::affinity_from_set_cookie(&response.headers, p));

                    match self.report(handle, status, affinity).await {
                        Next::Retry(next) => {
                            tracing::info!(service = %service.id, node = %node, status = %status, "Backend failed, retrying");
                            handle = next;
                            last = Some((response, index));
                        }
                        Next::Done(outcome) => {
                            return Ok(Forwarded {
                                response,
                                node_index: index,
                                attempts,
                                outcome,
                            });
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(service = %service.id, node = %node, error = %err, "Backend unreachable");

                    match self.report_unreachable(handle).await {
                        Next::Retry(next) => handle = next,
                        Next::Done(outcome) => {
                            return match last {
                                Some((response, node_index)) => Ok(Forwarded {
                                    response,
                                    node_index,
                                    attempts,
                                    outcome,
                                }),
                                None => Err(SelectorError::Upstream {
                                    node: node.authority(),
                                    source: err,
                                }),
                            };
                        }
                    }
                }
            }
        }
    }
}

/// Value part of a `param=value` session key.
fn session_value(session_key: &str) -> &str {
    session_key
        .split_once('=')
        .map(|(_, v)| v)
        .unwrap_or(session_key)
}

fn session_param(session_key: &str) -> &str {
    session_key
        .split_once('=')
        .map(|(p, _)| p)
        .unwrap_or("")
}
