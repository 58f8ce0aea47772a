//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request head (host, path)
//!     → router.rs (priority-ordered scan of the current table)
//!     → matcher.rs (host / path prefix conditions, AND-ed)
//!     → Return: Arc<Service> or no match (404)
//!
//! Reload:
//!     ServiceConfig[] → compile → sort → atomic swap
//! ```

pub mod matcher;
pub mod router;

pub use router::ServiceRegistry;
