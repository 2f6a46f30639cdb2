//! Structured reporting of transfers and rate changes
//!
//! Every record is a `tracing` event carrying machine-readable fields plus a
//! one-line human summary. When a [`MetricsRegistry`] is attached the same
//! events also update Prometheus metrics.

use std::sync::Arc;

use throttleproxy_core::domain::{
    BytesPerSecond, ByteCount, DomainError, RequestedRate, TerminalState, ThrottleKey,
    TransferRecord,
};
use throttleproxy_core::format::{format_bytes, format_rate};
use throttleproxy_telemetry::MetricsRegistry;
use throttleproxy_throttle::RateChange;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct TransferReporter {
    metrics: Option<Arc<MetricsRegistry>>,
}

impl TransferReporter {
    /// A reporter that only logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter that logs and updates `metrics`.
    pub fn with_metrics(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            metrics: Some(metrics),
        }
    }

    /// A forwarded request has been admitted.
    pub fn record_start(&self, key: &ThrottleKey, url: &str, rate: BytesPerSecond) {
        info!(
            key = %key,
            url,
            rate = rate.get(),
            "Throttling request for {} to {}/s",
            url,
            format_bytes(rate.get())
        );
        if let Some(metrics) = &self.metrics {
            metrics.inc_in_flight();
        }
    }

    /// A forwarded request reached its terminal state.
    ///
    /// `in_flight` is the key's count including this request. Values that are
    /// not known (status, content type, achieved rate) are left off the event.
    pub fn record(&self, record: &TransferRecord, in_flight: usize) {
        let resource = record.resource();
        let summary = summary(record, in_flight);
        let achieved = record.achieved_rate();

        macro_rules! emit {
            ($level:ident) => {
                $level!(
                    key = %record.key,
                    request_id = %record.request_id,
                    outcome = record.outcome.as_str(),
                    resource = %resource.stem,
                    extension = resource.extension.as_deref(),
                    content_type = record.content_type.as_deref(),
                    status = record.status,
                    size = %record.size,
                    bytes_relayed = record.bytes_relayed,
                    elapsed_secs = record.elapsed.as_secs_f64(),
                    achieved_rate = achieved,
                    requested_rate = %record.requested_rate,
                    in_flight,
                    "{}",
                    summary
                )
            };
        }

        match record.outcome {
            TerminalState::Completed | TerminalState::Aborted => emit!(info),
            TerminalState::Errored => emit!(warn),
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_transfer(
                record.outcome,
                record.bytes_relayed,
                record.elapsed.as_secs_f64(),
            );
            metrics.dec_in_flight();
        }
    }

    /// A rate change was accepted.
    pub fn record_rate_change(&self, key: &ThrottleKey, change: &RateChange) {
        info!(
            key = %key,
            kind = change.kind(),
            rate = change.rate().get(),
            "{}",
            change
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_change(change.kind());
        }
    }

    /// A rate change was rejected; nothing was stored.
    pub fn record_rejected_rate(&self, key: &ThrottleKey, err: &DomainError) {
        error!(key = %key, error = %err, "{}", err);
        if let Some(metrics) = &self.metrics {
            metrics.record_rate_change("rejected");
        }
    }
}

/// One-line human summary of a finished transfer.
///
/// `<Outcome> <resource> (<content-type>) --> <size> over <t> s
/// (<achieved> / <requested>) [<n> concurrent requests]`
pub fn summary(record: &TransferRecord, in_flight: usize) -> String {
    let content_type = record
        .content_type
        .as_deref()
        .map(|ct| format!(" ({ct})"))
        .unwrap_or_default();
    let size = match record.size {
        ByteCount::Known(n) => format_bytes(n),
        ByteCount::Unknown => "unknown".to_string(),
    };
    let achieved = record
        .achieved_rate()
        .map_or_else(|| "unknown".to_string(), format_rate);
    let requested = match record.requested_rate {
        RequestedRate::Known(rate) => format_rate(rate.as_f64()),
        RequestedRate::Unreliable => "unreliable".to_string(),
    };

    format!(
        "{} {}{} --> {} over {:.3} s ({} / {}) [{} concurrent requests]",
        record.outcome,
        record.resource(),
        content_type,
        size,
        record.elapsed.as_secs_f64(),
        achieved,
        requested,
        in_flight
    )
}
