//! End-to-end tests: gateway in front of raw TCP mock backends.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::http::StatusCode;

use api_gateway::config::{
    GatewayConfig, LoadBalancingConfig, ServiceConfig, SessionKeySource, StickySessionConfig, ThrottlePolicy,
};
use api_gateway::load_balancer::BackendNode;

mod common;

use common::Reply;

fn node(addr: SocketAddr) -> BackendNode {
    BackendNode::new(addr.ip().to_string(), addr.port())
}

fn service(id: &str, prefix: &str, nodes: Vec<BackendNode>) -> ServiceConfig {
    ServiceConfig {
        id: id.into(),
        host: None,
        path_prefix: Some(prefix.into()),
        priority: 0,
        strip_prefix: false,
        nodes,
        load_balancing: LoadBalancingConfig::default(),
        throttle: None,
    }
}

fn gateway_config(services: Vec<ServiceConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.observability.metrics_enabled = false;
    config.timeouts.request_secs = 5;
    config.services = services;
    config
}

#[tokio::test]
async fn test_first_failure_failover_and_sticky_binding() {
    let failing = common::start_backend(|_| Reply::status(500, "node0 down")).await;
    let healthy = common::start_backend(|_| Reply::ok("node1").with_header("Set-Cookie", "aff=x; Path=/")).await;

    let mut svc = service("shop", "/", vec![node(failing.addr), node(healthy.addr)]);
    svc.load_balancing.sticky = Some(StickySessionConfig {
        param: "aff".into(),
        source: SessionKeySource::Cookie,
    });
    let (gateway, shutdown) = common::start_gateway(gateway_config(vec![svc])).await;
    let client = common::client();

    let first = client
        .get(format!("http://{}/cart", gateway))
        .header("Cookie", "aff=A")
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().get("x-request-id").is_some());
    assert_eq!(first.text().await.unwrap(), "node1");
    assert_eq!(failing.hits(), 1);

    for cookie in ["aff=A", "aff=x"] {
        let response = client
            .get(format!("http://{}/cart", gateway))
            .header("Cookie", cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "node1");
    }
    assert_eq!(failing.hits(), 1);
    assert_eq!(healthy.hits(), 3);

    shutdown.trigger();
}

#[tokio::test]
async fn test_exhausted_failover_returns_last_backend_response() {
    let a = common::start_backend(|_| Reply::status(500, "a")).await;
    let b = common::start_backend(|_| Reply::status(503, "b")).await;

    let svc = service("api", "/", vec![node(a.addr), node(b.addr)]);
    let (gateway, shutdown) = common::start_gateway(gateway_config(vec![svc])).await;

    let response = common::client()
        .get(format!("http://{}/x", gateway))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_server_error());
    let body = response.text().await.unwrap();
    assert!(body == "a" || body == "b");
    assert_eq!(a.hits() + b.hits(), 2);

    shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_backends_yield_bad_gateway() {
    let svc = service("api", "/", vec![node(common::dead_addr().await)]);
    let (gateway, shutdown) = common::start_gateway(gateway_config(vec![svc])).await;

    let response = common::client()
        .get(format!("http://{}/x", gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    shutdown.trigger();
}

#[tokio::test]
async fn test_global_throttle_rejects_with_retry_after() {
    let backend = common::start_mock_backend("ok").await;

    let mut svc = service("limited", "/", vec![node(backend.addr)]);
    svc.throttle = Some(ThrottlePolicy {
        global_enabled: true,
        limit: 2,
        window_ms: 60_000,
        policy_ref: None,
    });
    let (gateway, shutdown) = common::start_gateway(gateway_config(vec![svc])).await;
    let client = common::client();

    for _ in 0..2 {
        let response = client.get(format!("http://{}/", gateway)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let denied = client.get(format!("http://{}/", gateway)).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = denied.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    assert!(denied.headers().get("x-ratelimit-retry-after-ms").is_some());
    assert_eq!(backend.hits(), 2);

    shutdown.trigger();
}

#[tokio::test]
async fn test_per_consumer_throttle_isolation() {
    let backend = common::start_mock_backend("ok").await;

    let mut svc = service("per-consumer", "/", vec![node(backend.addr)]);
    svc.throttle = Some(ThrottlePolicy {
        global_enabled: false,
        limit: 1,
        window_ms: 60_000,
        policy_ref: None,
    });
    let (gateway, shutdown) = common::start_gateway(gateway_config(vec![svc])).await;
    let client = common::client();

    let send = |consumer: &'static str| {
        client
            .get(format!("http://{}/", gateway))
            .header("x-consumer-id", consumer)
            .send()
    };

    assert_eq!(send("alice").await.unwrap().status(), StatusCode::OK);
    assert_eq!(send("alice").await.unwrap().status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(send("bob").await.unwrap().status(), StatusCode::OK);

    shutdown.trigger();
}

#[tokio::test]
async fn test_routing_and_prefix_stripping() {
    let echo = common::start_backend(|req| Reply::ok(req.path.clone())).await;

    let mut stripped = service("users", "/users", vec![node(echo.addr)]);
    stripped.strip_prefix = true;
    let kept = service("orders", "/orders", vec![node(echo.addr)]);
    let (gateway, shutdown) = common::start_gateway(gateway_config(vec![stripped, kept])).await;
    let client = common::client();

    let body = client
        .get(format!("http://{}/users/42?full=1", gateway))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "/42?full=1");

    let body = client
        .get(format!("http://{}/orders/7", gateway))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "/orders/7");

    let missing = client.get(format!("http://{}/nothing", gateway)).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    shutdown.trigger();
}

#[tokio::test]
async fn test_request_body_is_forwarded_and_bounded() {
    let echo = common::start_backend(|req| Reply::ok(String::from_utf8_lossy(&req.body).to_string())).await;

    let mut config = gateway_config(vec![service("upload", "/", vec![node(echo.addr)])]);
    config.security.max_body_size = 16;
    let (gateway, shutdown) = common::start_gateway(config).await;
    let client = common::client();

    let small = client
        .post(format!("http://{}/upload", gateway))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(small.text().await.unwrap(), "hello");

    let large = client
        .post(format!("http://{}/upload", gateway))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(large.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(echo.hits(), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn test_service_without_nodes_is_unavailable() {
    let (gateway, shutdown) = common::start_gateway(gateway_config(vec![service("empty", "/", vec![])])).await;

    let response = common::client()
        .get(format!("http://{}/", gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    shutdown.trigger();
}

#[tokio::test]
async fn test_request_deadline_covers_waiting_for_a_slot() {
    let silent = common::start_silent_backend().await;

    let mut config = gateway_config(vec![service("slow", "/", vec![node(silent)])]);
    config.timeouts.request_secs = 1;
    config.listener.max_connections = 1;
    let (gateway, shutdown) = common::start_gateway(config).await;
    let client = common::client();

    let holder = tokio::spawn({
        let request = client.get(format!("http://{}/hold", gateway));
        async move { request.send().await.unwrap().status() }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    let queued = client.get(format!("http://{}/queued", gateway)).send().await.unwrap();
    assert_eq!(queued.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(holder.await.unwrap(), StatusCode::REQUEST_TIMEOUT);

    shutdown.trigger();
}
