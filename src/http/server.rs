//! HTTP server setup and request pipeline.
//!
//! # Responsibilities
//! - Build the shared traffic-control state from `GatewayConfig`
//! - Wire up middleware (request ID, tracing, timeout, concurrency)
//! - Resolve → admit → buffer → select/forward each request
//! - Run background tasks: event publisher, store janitor, config reload

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{request::Parts, HeaderName, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::clock::SystemClock;
use crate::config::{EventSinkKind, GatewayConfig};
use crate::http::request::{self, X_REQUEST_ID};
use crate::http::response::GatewayError;
use crate::load_balancer::{
    sticky::extract_session_key, BackendSelector, HyperUpstream, StickySessionRecord, Upstream,
};
use crate::observability::metrics;
use crate::routing::ServiceRegistry;
use crate::security::{
    AdmissionController, BufferedEventSink, EventPublisher, HttpPolicyOracle, HttpPublisher, LogPublisher,
    OracleError, ThrottleCounter,
};
use crate::store::MemoryStore;

/// Grace period for flushing admission events on shutdown.
const EVENT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid consumer header '{0}'")]
    InvalidConsumerHeader(String),
    #[error("failed to build policy oracle client: {0}")]
    Oracle(#[from] OracleError),
    #[error("failed to build event publisher client: {0}")]
    EventClient(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub selector: Arc<BackendSelector>,
    pub admission: Arc<AdmissionController>,
    pub upstream: Arc<dyn Upstream>,
    pub consumer_header: HeaderName,
    pub max_body_size: usize,
}

struct EventPipeline {
    sink: BufferedEventSink,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    registry: Arc<ServiceRegistry>,
    sessions: MemoryStore<StickySessionRecord>,
    counters: MemoryStore<ThrottleCounter>,
    events: Option<EventPipeline>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let consumer_header = HeaderName::from_bytes(config.throttle.consumer_header.to_lowercase().as_bytes())
            .map_err(|_| ServerError::InvalidConsumerHeader(config.throttle.consumer_header.clone()))?;

        let registry = Arc::new(ServiceRegistry::from_config(&config.services));
        let sessions = MemoryStore::new();
        let counters = MemoryStore::new();

        let selector = Arc::new(BackendSelector::new(
            Arc::new(sessions.clone()),
            Duration::from_secs(config.sessions.ttl_secs),
        ));

        let mut admission = AdmissionController::new(Arc::new(counters.clone()), Arc::new(SystemClock));
        if let Some(url) = &config.throttle.oracle_url {
            let timeout = Duration::from_millis(config.throttle.oracle_timeout_ms);
            let oracle = HttpPolicyOracle::new(url.clone(), timeout)?;
            admission = admission.with_oracle(Arc::new(oracle), timeout);
        }

        let events = Self::event_pipeline(&config)?;
        if let Some(pipeline) = &events {
            admission = admission.with_events(Arc::new(pipeline.sink.clone()));
        }

        let state = AppState {
            registry: registry.clone(),
            selector,
            admission: Arc::new(admission),
            upstream: Arc::new(HyperUpstream::new(Duration::from_secs(config.timeouts.connect_secs))),
            consumer_header,
            max_body_size: config.security.max_body_size,
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            registry,
            sessions,
            counters,
            events,
        })
    }

    fn event_pipeline(config: &GatewayConfig) -> Result<Option<EventPipeline>, ServerError> {
        let events = &config.throttle.events;
        let publisher: Arc<dyn EventPublisher> = match (&events.kind, &events.endpoint) {
            (EventSinkKind::None, _) => return Ok(None),
            (EventSinkKind::Log, _) => Arc::new(LogPublisher),
            (EventSinkKind::Http, Some(endpoint)) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.timeouts.request_secs))
                    .build()?;
                Arc::new(HttpPublisher::new(client, endpoint.clone()))
            }
            (EventSinkKind::Http, None) => {
                tracing::warn!("HTTP event sink without endpoint, falling back to log publisher");
                Arc::new(LogPublisher)
            }
        };

        Ok(Some(EventPipeline {
            sink: BufferedEventSink::new(events.buffer_capacity),
            publisher,
            topic: events.topic.clone(),
        }))
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections.max(1)))
            // The deadline includes time spent waiting for a concurrency slot.
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                let request_id = req
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id,
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires.
    ///
    /// `config_updates` carries validated configs from the file watcher; each
    /// one replaces the service table.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: Option<mpsc::UnboundedReceiver<GatewayConfig>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, services = self.registry.len(), "HTTP server starting");

        let events_task = self.events.map(|pipeline| {
            tokio::spawn(pipeline.sink.run(pipeline.publisher, pipeline.topic, shutdown.resubscribe()))
        });

        let mut background: Vec<JoinHandle<()>> = Vec::new();
        background.push(tokio::spawn(purge_stores(
            self.sessions,
            self.counters,
            Duration::from_secs(self.config.sessions.purge_interval_secs.max(1)),
            shutdown.resubscribe(),
        )));
        if let Some(updates) = config_updates {
            background.push(tokio::spawn(apply_reloads(
                self.registry.clone(),
                updates,
                shutdown.resubscribe(),
            )));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        for task in background {
            task.abort();
        }
        if let Some(task) = events_task {
            if tokio::time::timeout(EVENT_FLUSH_TIMEOUT, task).await.is_err() {
                tracing::warn!("Admission events not flushed before shutdown deadline");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Periodically drop expired sticky records and throttle counters.
async fn purge_stores(
    sessions: MemoryStore<StickySessionRecord>,
    counters: MemoryStore<ThrottleCounter>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let sessions_purged = sessions.purge_expired();
                let counters_purged = counters.purge_expired();
                if sessions_purged + counters_purged > 0 {
                    tracing::debug!(sessions = sessions_purged, counters = counters_purged, "Purged expired entries");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn apply_reloads(
    registry: Arc<ServiceRegistry>,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => registry.reload(&config.services),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

/// Main proxy handler.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();

    let (service_id, result) = dispatch(&state, parts, body, client).await;
    let response = match result {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(service = %service_id, error = %err, "Request answered by gateway");
            err.into_response()
        }
    };

    metrics::record_request(&method, response.status().as_u16(), &service_id, start_time);
    response
}

async fn dispatch(
    state: &AppState,
    parts: Parts,
    body: Body,
    client: SocketAddr,
) -> (String, Result<Response, GatewayError>) {
    let Some(service) = state.registry.resolve(&parts) else {
        tracing::warn!(
            request_id = %request::request_id(&parts),
            path = %parts.uri.path(),
            "No service matched"
        );
        return ("none".to_string(), Err(GatewayError::NoRoute));
    };

    let result = forward(state, &parts, body, client, &service).await;
    (service.id.clone(), result)
}

async fn forward(
    state: &AppState,
    parts: &Parts,
    body: Body,
    client: SocketAddr,
    service: &crate::service::Service,
) -> Result<Response, GatewayError> {
    let consumer = request::consumer_key(parts, &state.consumer_header);
    let decision = state.admission.check_and_admit(service, consumer.as_deref()).await;
    if !decision.allowed {
        return Err(GatewayError::Throttled {
            retry_after_ms: decision.retry_after_ms,
        });
    }

    let session_key = service
        .load_balancing
        .sticky
        .as_ref()
        .and_then(|sticky| extract_session_key(sticky, &parts.headers, parts.uri.query()));

    let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let proxy_request = request::buffer_request(
        parts,
        body,
        service.upstream_path(path_and_query),
        state.max_body_size,
        client,
    )
    .await?;

    let forwarded = state
        .selector
        .forward(
            service,
            &service.nodes,
            session_key.as_deref(),
            &proxy_request,
            state.upstream.as_ref(),
        )
        .await?;

    tracing::debug!(
        request_id = %request::request_id(parts),
        service = %service.id,
        node = forwarded.node_index,
        attempts = forwarded.attempts,
        outcome = ?forwarded.outcome,
        status = %forwarded.response.status,
        "Request forwarded"
    );

    Ok(forwarded.response.into_response())
}
