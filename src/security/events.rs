//! Admission event side channel.
//!
//! # Data Flow
//! ```text
//! AdmissionController ──publish()──▶ BufferedEventSink (bounded VecDeque)
//!                                         │  full? drop oldest
//!                                         ▼
//!                                   run() task ──▶ EventPublisher
//!                                                   (log / HTTP collector)
//! ```
//!
//! # Design Decisions
//! - `publish` never blocks or awaits; the request path does not wait for I/O
//! - Publication failures are logged and otherwise ignored

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use crate::observability::metrics;

/// One admission decision, as published for cross-instance auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionEvent {
    pub event_id: Uuid,
    pub service_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_key: Option<String>,
    pub allowed: bool,
    pub count: i64,
    pub limit: i64,
    pub window_start_ms: i64,
    pub timestamp_ms: i64,
}

/// Fire-and-forget consumer of admission events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: AdmissionEvent);
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event transport error: {0}")]
    Transport(String),
    #[error("event collector rejected event with status {0}")]
    Rejected(u16),
}

/// Delivers events to their final destination.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn send(&self, topic: &str, event: &AdmissionEvent) -> Result<(), EventError>;
}

/// Writes events to the `admission_audit` tracing target.
#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn send(&self, topic: &str, event: &AdmissionEvent) -> Result<(), EventError> {
        tracing::info!(
            target: "admission_audit",
            topic = %topic,
            event_id = %event.event_id,
            service = %event.service_id,
            consumer = event.consumer_key.as_deref().unwrap_or("-"),
            allowed = event.allowed,
            count = event.count,
            limit = event.limit,
            window_start_ms = event.window_start_ms,
            "admission"
        );
        Ok(())
    }
}

/// POSTs each event as JSON to `<endpoint>/topics/<topic>`.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPublisher {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EventPublisher for HttpPublisher {
    async fn send(&self, topic: &str, event: &AdmissionEvent) -> Result<(), EventError> {
        let response = self
            .client
            .post(format!("{}/topics/{}", self.endpoint, topic))
            .json(event)
            .send()
            .await
            .map_err(|e| EventError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(EventError::Rejected(response.status().as_u16()))
        }
    }
}

struct Buffer {
    queue: Mutex<VecDeque<AdmissionEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

/// Bounded in-process buffer drained by a background task.
#[derive(Clone)]
pub struct BufferedEventSink {
    inner: Arc<Buffer>,
}

impl BufferedEventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Buffer {
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
                capacity: capacity.max(1),
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Events waiting to be delivered.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().expect("event buffer mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Deliver buffered events until shutdown, then flush what is left.
    pub async fn run(
        self,
        publisher: Arc<dyn EventPublisher>,
        topic: String,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::info!(topic = %topic, capacity = self.inner.capacity, "Admission event publisher starting");

        loop {
            tokio::select! {
                _ = self.inner.notify.notified() => {
                    self.drain(publisher.as_ref(), &topic).await;
                }
                _ = shutdown.recv() => {
                    self.drain(publisher.as_ref(), &topic).await;
                    tracing::info!("Admission event publisher received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn drain(&self, publisher: &dyn EventPublisher, topic: &str) {
        // One event in flight at a time keeps the drop-oldest bound at `capacity`.
        while let Some(event) = self.pop() {
            if let Err(e) = publisher.send(topic, &event).await {
                tracing::warn!(event_id = %event.event_id, error = %e, "Failed to publish admission event");
            }
        }
    }

    fn pop(&self) -> Option<AdmissionEvent> {
        self.inner.queue.lock().expect("event buffer mutex poisoned").pop_front()
    }
}

impl EventSink for BufferedEventSink {
    fn publish(&self, event: AdmissionEvent) {
        {
            let mut queue = self.inner.queue.lock().expect("event buffer mutex poisoned");
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_dropped();
            }
            queue.push_back(event);
        }
        self.inner.notify.notify_one();
    }
}
