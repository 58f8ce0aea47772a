//! In-process store backed by `DashMap`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{StoreError, TtlStore};

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Slot<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// A thread-safe TTL map shared by cloning.
///
/// Each key lives in exactly one DashMap shard, so `update` holds that
/// shard's write lock for the duration of the closure and nothing else.
#[derive(Debug, Clone)]
pub struct MemoryStore<V> {
    inner: Arc<DashMap<String, Slot<V>>>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }
}

impl<V> MemoryStore<V> {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.inner.len())
    }
}

#[async_trait]
impl<V> TtlStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        let now = Instant::now();
        // Copy out before touching the map again; holding a shard guard across
        // `remove_if` on the same shard would deadlock.
        let hit = self
            .inner
            .get(key)
            .map(|slot| (slot.is_live(now), slot.value.clone()));

        match hit {
            Some((true, value)) => Ok(Some(value)),
            Some((false, _)) => {
                self.inner.remove_if(key, |_, slot| !slot.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: V, ttl: Duration) -> Result<(), StoreError> {
        self.inner.insert(key.to_string(), Slot::new(value, ttl));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key);
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        ttl: Duration,
        apply: &mut (dyn for<'a> FnMut(Option<&'a V>) -> Option<V> + Send),
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let next = {
                    let slot = occupied.get();
                    if slot.is_live(now) {
                        apply(Some(&slot.value))
                    } else {
                        apply(None)
                    }
                };
                if let Some(value) = next {
                    occupied.insert(Slot::new(value, ttl));
                }
            }
            Entry::Vacant(vacant) => {
                if let Some(value) = apply(None) {
                    vacant.insert(Slot::new(value, ttl));
                }
            }
        }
        Ok(())
    }
}
