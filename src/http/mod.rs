//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → routing (resolve service)
//!     → security (admission decision)
//!     → request.rs (consumer identity, buffered replayable copy)
//!     → load_balancer (sticky selection, failover)
//!     → response.rs (gateway-generated errors only)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{ConsumerIdentity, X_REQUEST_ID};
pub use response::GatewayError;
pub use server::{AppState, HttpServer, ServerError};
