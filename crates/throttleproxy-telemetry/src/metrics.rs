//! Prometheus metrics registry for throttleproxy
//!
//! Typed counters, a gauge and a histogram covering proxied transfers and
//! rate changes.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use throttleproxy_core::domain::TerminalState;

/// Central metrics registry holding all Prometheus metrics.
pub struct MetricsRegistry {
    registry: Registry,
    /// Counter: finished transfers by outcome (completed, aborted, errored)
    pub transfers_total: IntCounterVec,
    /// Counter: bytes released to callers
    pub bytes_relayed_total: IntCounter,
    /// Gauge: requests currently being forwarded, across all keys
    pub in_flight_requests: IntGauge,
    /// Counter: rate change requests by kind (initial, queued, rejected)
    pub rate_changes_total: IntCounterVec,
    /// Histogram: transfer duration in seconds by outcome
    pub transfer_duration_seconds: HistogramVec,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with all metrics registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("throttleproxy".to_string()), None)?;

        let transfers_total = IntCounterVec::new(
            Opts::new("transfers_total", "Finished transfers by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let bytes_relayed_total =
            IntCounter::new("bytes_relayed_total", "Total bytes relayed to callers")?;
        registry.register(Box::new(bytes_relayed_total.clone()))?;

        let in_flight_requests =
            IntGauge::new("in_flight_requests", "Requests currently being forwarded")?;
        registry.register(Box::new(in_flight_requests.clone()))?;

        let rate_changes_total = IntCounterVec::new(
            Opts::new("rate_changes_total", "Rate change requests by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(rate_changes_total.clone()))?;

        let transfer_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "transfer_duration_seconds",
                "Transfer duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 30.0, 120.0, f64::INFINITY]),
            &["outcome"],
        )?;
        registry.register(Box::new(transfer_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            transfers_total,
            bytes_relayed_total,
            in_flight_requests,
            rate_changes_total,
            transfer_duration_seconds,
        })
    }

    // ========================================================================
    // Recording helpers
    // ========================================================================

    /// Record a transfer reaching its terminal state.
    pub fn record_transfer(&self, outcome: TerminalState, bytes: u64, duration_secs: f64) {
        let label = outcome.as_str();
        self.transfers_total.with_label_values(&[label]).inc();
        self.bytes_relayed_total.inc_by(bytes);
        self.transfer_duration_seconds
            .with_label_values(&[label])
            .observe(duration_secs);
    }

    /// Record a rate change (`initial`, `queued`) or a rejected input (`rejected`).
    pub fn record_rate_change(&self, kind: &str) {
        self.rate_changes_total.with_label_values(&[kind]).inc();
    }

    pub fn inc_in_flight(&self) {
        self.in_flight_requests.inc();
    }

    pub fn dec_in_flight(&self) {
        self.in_flight_requests.dec();
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
