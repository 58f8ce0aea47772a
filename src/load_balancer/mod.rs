//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Service resolved → ordered node list
//!     → sticky.rs (session key from cookie / header / query)
//!     → selector.rs (stored binding, else round_robin.rs ticket)
//!     → upstream.rs (dispatch an isolated copy of the request)
//!     → selector.rs (5xx? fail over or drop binding; else persist)
//!     → Return the last backend response
//! ```
//!
//! # Design Decisions
//! - Bindings store a node index, not a node; index order is stable per generation
//! - Round-robin counter is per service, lock-free
//! - Failover is bounded by `max_attempts` (default: every node once)

pub mod backend;
pub mod round_robin;
pub mod selector;
pub mod sticky;
pub mod upstream;

pub use backend::BackendNode;
pub use selector::{BackendSelector, Forwarded, Next, Outcome, SelectionHandle, SelectorError};
pub use sticky::StickySessionRecord;
pub use upstream::{HyperUpstream, ProxyRequest, Upstream, UpstreamError, UpstreamResponse};
