//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (service resolved, consumer identified):
//!     → rate_limit.rs (fixed-window counter per service or consumer)
//!     → policy.rs (oracle lookup on first sight of a consumer)
//!     → events.rs (decision published off the request path)
//!     → Admitted requests continue to the backend selector
//! ```
//!
//! # Design Decisions
//! - Fail closed whenever a policy oracle governs the limit
//! - Fail open for static limits when the counter store is down
//! - Denials carry a retry-after hint derived from the window end

pub mod events;
pub mod policy;
pub mod rate_limit;

pub use events::{
    AdmissionEvent, BufferedEventSink, EventError, EventPublisher, EventSink, HttpPublisher, LogPublisher,
};
pub use policy::{HttpPolicyOracle, OracleError, PolicyOracle, PolicyVerdict};
pub use rate_limit::{AdmissionController, Decision, ThrottleCounter};
