//! Throttle groups and channels
//!
//! A [`ThrottleGroup`] is the single shared budget for one key. Every request
//! forwarded for that key draws from it through its own [`ThrottleChannel`],
//! so the combined throughput of all concurrent requests for a key stays at
//! the key's rate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use throttleproxy_core::domain::{BytesPerSecond, ThrottleKey};
use tracing::debug;

use crate::bucket::TokenBucket;

// ============================================================================
// ThrottleGroup
// ============================================================================

/// Shared token budget for one key.
#[derive(Debug)]
pub struct ThrottleGroup {
    key: ThrottleKey,
    bucket: Arc<TokenBucket>,
    active: Arc<AtomicUsize>,
}

impl ThrottleGroup {
    pub fn new(key: ThrottleKey, rate: BytesPerSecond, burst: Duration) -> Self {
        Self {
            key,
            bucket: Arc::new(TokenBucket::new(rate, burst)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn key(&self) -> &ThrottleKey {
        &self.key
    }

    /// The rate the group is currently enforcing.
    pub fn rate(&self) -> BytesPerSecond {
        self.bucket.rate()
    }

    /// Changes the group's rate in place, for existing and future channels.
    pub fn retarget(&self, rate: BytesPerSecond) {
        debug!(key = %self.key, rate = rate.get(), "Retargeting throttle group");
        self.bucket.set_rate(rate);
    }

    /// Opens a new channel drawing on this group's budget.
    pub fn channel(&self) -> ThrottleChannel {
        self.active.fetch_add(1, Ordering::SeqCst);
        ThrottleChannel {
            bucket: Arc::clone(&self.bucket),
            active: Arc::clone(&self.active),
            consumed: 0,
        }
    }

    /// Number of channels currently open.
    pub fn active_channels(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

// ============================================================================
// ThrottleChannel
// ============================================================================

/// Per-request handle into a group's shared budget.
///
/// Closing happens on drop.
#[derive(Debug)]
pub struct ThrottleChannel {
    bucket: Arc<TokenBucket>,
    active: Arc<AtomicUsize>,
    consumed: u64,
}

impl ThrottleChannel {
    /// Waits until `bytes` may be released downstream.
    pub async fn throttle(&mut self, bytes: u64) {
        self.bucket.consume(bytes).await;
        self.consumed += bytes;
    }

    /// Total bytes this channel has been granted.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// The owning group's current rate.
    pub fn rate(&self) -> BytesPerSecond {
        self.bucket.rate()
    }
}

impl Drop for ThrottleChannel {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// GroupManager
// ============================================================================

/// At most one [`ThrottleGroup`] per key. Groups are never removed.
#[derive(Debug)]
pub struct GroupManager {
    groups: DashMap<ThrottleKey, Arc<ThrottleGroup>>,
    burst: Duration,
}

impl GroupManager {
    pub fn new(burst: Duration) -> Self {
        Self {
            groups: DashMap::new(),
            burst,
        }
    }

    /// Returns the key's group, creating it at `initial_rate` if absent.
    ///
    /// `initial_rate` is ignored when the group already exists.
    pub fn get_or_create(
        &self,
        key: &ThrottleKey,
        initial_rate: BytesPerSecond,
    ) -> Arc<ThrottleGroup> {
        let entry = self.groups.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, rate = initial_rate.get(), "Creating throttle group");
            Arc::new(ThrottleGroup::new(key.clone(), initial_rate, self.burst))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &ThrottleKey) -> Option<Arc<ThrottleGroup>> {
        self.groups.get(key).map(|g| Arc::clone(g.value()))
    }

    /// Retargets the key's group. Returns the previous rate, or `None` if no
    /// group exists (nothing is created).
    pub fn retarget(&self, key: &ThrottleKey, rate: BytesPerSecond) -> Option<BytesPerSecond> {
        let group = self.get(key)?;
        let previous = group.rate();
        group.retarget(rate);
        Some(previous)
    }

    /// Opens a channel on the key's group, creating the group at
    /// `initial_rate` if absent.
    pub fn acquire_channel(&self, key: &ThrottleKey, initial_rate: BytesPerSecond) -> ThrottleChannel {
        self.get_or_create(key, initial_rate).channel()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
