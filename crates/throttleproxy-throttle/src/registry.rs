//! Rate registry
//!
//! Maps each key to its target rate. Keys that were never set resolve to the
//! process-wide default. Every time a key's stored value actually changes its
//! revision is bumped, which lets a request tell whether the rate moved while
//! it was in flight.

use dashmap::DashMap;
use throttleproxy_core::domain::{BytesPerSecond, ThrottleKey};

#[derive(Debug, Clone, Copy)]
struct RateEntry {
    rate: BytesPerSecond,
    revision: u64,
}

/// A key's rate and revision captured at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    pub rate: BytesPerSecond,
    pub revision: u64,
}

/// Key → target rate store.
#[derive(Debug)]
pub struct RateRegistry {
    rates: DashMap<ThrottleKey, RateEntry>,
    default_rate: BytesPerSecond,
}

impl RateRegistry {
    pub fn new(default_rate: BytesPerSecond) -> Self {
        Self {
            rates: DashMap::new(),
            default_rate,
        }
    }

    pub fn default_rate(&self) -> BytesPerSecond {
        self.default_rate
    }

    fn default_entry(&self) -> RateEntry {
        RateEntry {
            rate: self.default_rate,
            revision: 0,
        }
    }

    /// The key's stored rate, or the default. Never inserts.
    pub fn get(&self, key: &ThrottleKey) -> BytesPerSecond {
        self.rates
            .get(key)
            .map_or(self.default_rate, |entry| entry.rate)
    }

    /// The key's current revision; 0 for keys never stored.
    pub fn revision(&self, key: &ThrottleKey) -> u64 {
        self.rates.get(key).map_or(0, |entry| entry.revision)
    }

    /// Captures `(rate, revision)`, storing the default first if the key is new.
    pub fn snapshot(&self, key: &ThrottleKey) -> RateSnapshot {
        self.snapshot_with(key, |_| ()).0
    }

    /// Captures a snapshot and runs `f` while the key's entry is still locked.
    ///
    /// A concurrent [`RateRegistry::store_with`] for the same key cannot run
    /// until `f` returns.
    pub fn snapshot_with<F, R>(&self, key: &ThrottleKey, f: F) -> (RateSnapshot, R)
    where
        F: FnOnce(RateSnapshot) -> R,
    {
        let entry = self
            .rates
            .entry(key.clone())
            .or_insert_with(|| self.default_entry());
        let snapshot = RateSnapshot {
            rate: entry.rate,
            revision: entry.revision,
        };
        let out = f(snapshot);
        drop(entry);
        (snapshot, out)
    }

    /// Stores `rate` for `key`.
    pub fn store(&self, key: &ThrottleKey, rate: BytesPerSecond) {
        self.store_with(key, rate, || ());
    }

    /// Stores `rate` and runs `f` while the key's entry is still locked.
    pub fn store_with<F, R>(&self, key: &ThrottleKey, rate: BytesPerSecond, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let mut entry = self
            .rates
            .entry(key.clone())
            .or_insert_with(|| self.default_entry());
        if entry.rate != rate {
            entry.rate = rate;
            entry.revision += 1;
        }
        let out = f();
        drop(entry);
        out
    }

    /// Number of keys with a stored rate.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}
