//! Round-robin starting-index selection.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared rotation counter for one service.
///
/// The only mutable state the selector owns itself. One counter per service
/// keeps unrelated services from contending on the same cache line.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the counter and return the next index in `0..len`.
    ///
    /// Returns `None` for an empty node list.
    pub fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(ticket % len)
    }
}
