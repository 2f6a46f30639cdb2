//! Per-key in-flight request counters
//!
//! [`ConcurrencyTracker::begin`] increments a key's count and hands back an
//! [`InFlightGuard`]. The count is decremented when the guard is released or
//! dropped, whichever happens first, and never twice.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use throttleproxy_core::domain::ThrottleKey;

#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    counts: DashMap<ThrottleKey, Arc<AtomicUsize>>,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks one more request in flight for `key`.
    pub fn begin(&self, key: &ThrottleKey) -> InFlightGuard {
        let counter = Arc::clone(
            self.counts
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .value(),
        );
        counter.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            key: key.clone(),
            counter: Some(counter),
        }
    }

    /// Requests currently in flight for `key`.
    pub fn count(&self, key: &ThrottleKey) -> usize {
        self.counts
            .get(key)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    /// Requests currently in flight across all keys.
    pub fn total(&self) -> usize {
        self.counts
            .iter()
            .map(|c| c.value().load(Ordering::SeqCst))
            .sum()
    }
}

/// One in-flight request. Decrements its key's count exactly once.
#[derive(Debug)]
pub struct InFlightGuard {
    key: ThrottleKey,
    counter: Option<Arc<AtomicUsize>>,
}

impl InFlightGuard {
    pub fn key(&self) -> &ThrottleKey {
        &self.key
    }

    /// In-flight count for this key, including this request while it is held.
    pub fn current(&self) -> usize {
        self.counter
            .as_ref()
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    /// Decrements now. Returns the count after the decrement.
    pub fn release(mut self) -> usize {
        self.decrement()
    }

    fn decrement(&mut self) -> usize {
        match self.counter.take() {
            Some(counter) => counter.fetch_sub(1, Ordering::SeqCst) - 1,
            None => 0,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.decrement();
    }
}
