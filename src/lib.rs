//! API gateway traffic-control plane.
//!
//! Sticky, failover-aware backend selection and fixed-window admission
//! control behind an axum reverse proxy.

pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod routing;
pub mod security;
pub mod service;
pub mod store;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::BackendSelector;
pub use security::AdmissionController;
pub use service::Service;
