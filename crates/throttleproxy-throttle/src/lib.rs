//! throttleproxy Throttle - per-key bandwidth shaping
//!
//! Everything the proxy needs to decide how fast bytes may flow for a key:
//!
//! - [`bucket`] - byte-denominated token bucket with FIFO grants and live retargeting
//! - [`group`] - one shared bucket per key, handing out per-request channels
//! - [`registry`] - key to target-rate store with change revisions
//! - [`tracker`] - per-key in-flight counters released exactly once
//! - [`service`] - the [`ThrottleService`] tying the above together

pub mod bucket;
pub mod group;
pub mod registry;
pub mod service;
pub mod tracker;

pub use bucket::TokenBucket;
pub use group::{GroupManager, ThrottleChannel, ThrottleGroup};
pub use registry::{RateRegistry, RateSnapshot};
pub use service::{RateChange, ThrottleService, ThrottleSettings};
pub use tracker::{ConcurrencyTracker, InFlightGuard};
