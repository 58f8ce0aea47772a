//! Keyed, TTL-capable state stores.
//!
//! # Data Flow
//! ```text
//! BackendSelector     ──▶ TtlStore<StickySessionRecord>
//! AdmissionController ──▶ TtlStore<ThrottleCounter>
//!                              │
//!                              ▼
//!                  memory.rs (DashMap, in-process)
//!                  or any shared cache implementing the trait
//! ```
//!
//! # Design Decisions
//! - TTL is advisory cleanup only; callers validate freshness themselves
//! - `update` is the single atomic read-modify-write primitive per key
//! - Cross-key ordering is not provided

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;

/// Errors surfaced by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing cache could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Contract every session or counter store satisfies.
#[async_trait]
pub trait TtlStore<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Read the live value for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<V>, StoreError>;

    /// Unconditionally write `value` with the given time-to-live.
    async fn put(&self, key: &str, value: V, ttl: Duration) -> Result<(), StoreError>;

    /// Delete `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically read and replace the value for `key`.
    ///
    /// `apply` sees the current live value (`None` when absent or expired) and
    /// returns the replacement, or `None` to leave the entry untouched. No
    /// other writer to the same key can interleave between the read and the
    /// write.
    async fn update(
        &self,
        key: &str,
        ttl: Duration,
        apply: &mut (dyn for<'a> FnMut(Option<&'a V>) -> Option<V> + Send),
    ) -> Result<(), StoreError>;
}
