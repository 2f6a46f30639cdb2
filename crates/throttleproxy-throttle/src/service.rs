//! The throttle service
//!
//! [`ThrottleService`] owns all per-key state: the rate registry, the throttle
//! groups and the in-flight counters. One instance is created at startup and
//! shared by `Arc` with every request handler.
//!
//! Lock order is always rates → groups. Both `set_rate` and `open_channel` hold
//! the key's registry entry while they touch its group, so a rate change and a
//! group creation for the same key can never interleave.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use throttleproxy_core::config::ThrottleConfig;
use throttleproxy_core::domain::{BytesPerSecond, DomainError, ThrottleKey};
use throttleproxy_core::format::format_bytes;
use tracing::{debug, info};

use crate::group::{GroupManager, ThrottleChannel, ThrottleGroup};
use crate::registry::{RateRegistry, RateSnapshot};
use crate::tracker::{ConcurrencyTracker, InFlightGuard};

// ============================================================================
// Settings
// ============================================================================

/// Validated throttle parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    /// Rate for keys that were never set
    pub default_rate: BytesPerSecond,
    /// Bucket depth in time at the current rate
    pub burst: Duration,
}

impl ThrottleSettings {
    pub fn from_config(config: &ThrottleConfig) -> Result<Self, DomainError> {
        Ok(Self {
            default_rate: BytesPerSecond::new(config.default_rate)?,
            burst: Duration::from_millis(config.burst_ms.max(1)),
        })
    }
}

// ============================================================================
// RateChange
// ============================================================================

/// Outcome of a successful rate change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateChange {
    /// No group existed yet; the rate applies from the key's first request.
    Initial { rate: BytesPerSecond },
    /// A group existed and was retargeted in place.
    Queued {
        from: BytesPerSecond,
        to: BytesPerSecond,
    },
}

impl RateChange {
    /// The rate now stored for the key.
    pub fn rate(&self) -> BytesPerSecond {
        match self {
            RateChange::Initial { rate } => *rate,
            RateChange::Queued { to, .. } => *to,
        }
    }

    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RateChange::Initial { .. } => "initial",
            RateChange::Queued { .. } => "queued",
        }
    }
}

impl Display for RateChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RateChange::Initial { rate } => {
                write!(f, "Setting throttle rate to {}/s", format_bytes(rate.get()))
            }
            RateChange::Queued { from, to } => write!(
                f,
                "Queuing throttle rate change from {}/s to {}/s",
                format_bytes(from.get()),
                format_bytes(to.get())
            ),
        }
    }
}

// ============================================================================
// ThrottleService
// ============================================================================

#[derive(Debug)]
pub struct ThrottleService {
    settings: ThrottleSettings,
    rates: RateRegistry,
    groups: GroupManager,
    tracker: ConcurrencyTracker,
}

impl ThrottleService {
    pub fn new(settings: ThrottleSettings) -> Self {
        info!(
            default_rate = settings.default_rate.get(),
            burst_ms = settings.burst.as_millis() as u64,
            "Throttle service initialized"
        );
        Self {
            settings,
            rates: RateRegistry::new(settings.default_rate),
            groups: GroupManager::new(settings.burst),
            tracker: ConcurrencyTracker::new(),
        }
    }

    pub fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    /// Parses `input` and stores it as the key's rate.
    ///
    /// On a parse error nothing is stored and no group is created. If the key
    /// already has a group it is retargeted in place and the change reports the
    /// group's previous rate.
    pub fn set_rate(&self, key: &ThrottleKey, input: &str) -> Result<RateChange, DomainError> {
        let rate: BytesPerSecond = input.parse()?;

        let change = self.rates.store_with(key, rate, || match self.groups.retarget(key, rate) {
            Some(from) => RateChange::Queued { from, to: rate },
            None => RateChange::Initial { rate },
        });

        debug!(key = %key, kind = change.kind(), rate = rate.get(), "Rate stored");
        Ok(change)
    }

    /// The key's stored rate, or the default. No side effects.
    pub fn rate(&self, key: &ThrottleKey) -> BytesPerSecond {
        self.rates.get(key)
    }

    /// Ensures the key has a rate and a group, then opens a channel on it.
    ///
    /// The returned snapshot records the rate the request starts under.
    pub fn open_channel(&self, key: &ThrottleKey) -> (ThrottleChannel, RateSnapshot) {
        let (snapshot, channel) = self
            .rates
            .snapshot_with(key, |snap| self.groups.acquire_channel(key, snap.rate));
        (channel, snapshot)
    }

    /// Marks a request in flight for `key`.
    pub fn begin_request(&self, key: &ThrottleKey) -> InFlightGuard {
        self.tracker.begin(key)
    }

    /// True if the key's stored rate changed after `snapshot` was taken.
    pub fn rate_changed_since(&self, key: &ThrottleKey, snapshot: &RateSnapshot) -> bool {
        self.rates.revision(key) != snapshot.revision
    }

    pub fn in_flight(&self, key: &ThrottleKey) -> usize {
        self.tracker.count(key)
    }

    pub fn group(&self, key: &ThrottleKey) -> Option<Arc<ThrottleGroup>> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> &GroupManager {
        &self.groups
    }

    pub fn rates(&self) -> &RateRegistry {
        &self.rates
    }

    pub fn tracker(&self) -> &ConcurrencyTracker {
        &self.tracker
    }
}
