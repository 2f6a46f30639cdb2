//! Exactly-once terminal bookkeeping for a forwarded request
//!
//! A [`TransferCompletion`] is created when a request is admitted and travels
//! with it until the last byte is released or the caller goes away. Whichever
//! terminal event comes first emits the transfer record and releases the
//! in-flight count; later events are ignored.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use throttleproxy_core::domain::{
    ByteCount, RequestId, RequestState, RequestedRate, TerminalState, ThrottleKey, TransferRecord,
};
use throttleproxy_throttle::{InFlightGuard, RateSnapshot, ThrottleService};
use tracing::warn;

use crate::report::TransferReporter;

#[derive(Debug)]
struct Inner {
    service: Arc<ThrottleService>,
    reporter: TransferReporter,
    guard: InFlightGuard,
    snapshot: RateSnapshot,
    request_id: RequestId,
    key: ThrottleKey,
    url: String,
    started_at: DateTime<Utc>,
    start: Instant,
    state: RequestState,
    status: Option<u16>,
    content_type: Option<String>,
    declared: ByteCount,
    relayed: u64,
    headers_received: bool,
}

/// Terminal bookkeeping for one request
#[derive(Debug)]
pub struct TransferCompletion {
    inner: Option<Inner>,
}

impl TransferCompletion {
    pub fn new(
        service: Arc<ThrottleService>,
        reporter: TransferReporter,
        guard: InFlightGuard,
        snapshot: RateSnapshot,
        url: String,
    ) -> Self {
        let key = guard.key().clone();
        Self {
            inner: Some(Inner {
                service,
                reporter,
                guard,
                snapshot,
                request_id: RequestId::new(),
                key,
                url,
                started_at: Utc::now(),
                start: Instant::now(),
                state: RequestState::Created,
                status: None,
                content_type: None,
                declared: ByteCount::Unknown,
                relayed: 0,
                headers_received: false,
            }),
        }
    }

    /// The resolved target URL, until the request finishes.
    pub fn url(&self) -> Option<&str> {
        self.inner.as_ref().map(|inner| inner.url.as_str())
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_none()
    }

    /// The origin request has been issued.
    pub fn mark_in_flight(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            transition(inner, RequestState::InFlight);
        }
    }

    /// Origin response headers arrived.
    pub fn headers_received(
        &mut self,
        status: u16,
        content_type: Option<String>,
        declared: ByteCount,
    ) {
        if let Some(inner) = self.inner.as_mut() {
            inner.status = Some(status);
            inner.content_type = content_type;
            inner.declared = declared;
            inner.headers_received = true;
        }
    }

    /// `bytes` more were released to the caller.
    pub fn add_relayed(&mut self, bytes: u64) {
        if let Some(inner) = self.inner.as_mut() {
            inner.relayed += bytes;
        }
    }

    /// Reaches the terminal state and emits the transfer record.
    ///
    /// Returns the record and the in-flight count it was reported with, or
    /// `None` if the request had already finished.
    pub fn finish(&mut self, outcome: TerminalState) -> Option<(TransferRecord, usize)> {
        let mut inner = self.inner.take()?;
        transition(&mut inner, RequestState::Finished(outcome));

        let requested_rate = if inner.service.rate_changed_since(&inner.key, &inner.snapshot) {
            RequestedRate::Unreliable
        } else {
            RequestedRate::Known(inner.snapshot.rate)
        };

        let record = TransferRecord {
            request_id: inner.request_id,
            key: inner.key,
            url: inner.url,
            status: inner.status,
            content_type: inner.content_type,
            size: inner.declared,
            bytes_relayed: inner.relayed,
            started_at: inner.started_at,
            elapsed: inner.start.elapsed(),
            requested_rate,
            outcome,
        };

        // the count includes this request; it is released only after reporting
        let in_flight = inner.guard.current();
        inner.reporter.record(&record, in_flight);
        inner.guard.release();

        Some((record, in_flight))
    }

    fn dropped_outcome(inner: &Inner) -> TerminalState {
        match inner.declared {
            ByteCount::Known(size) if inner.headers_received && inner.relayed >= size => {
                TerminalState::Completed
            }
            _ => TerminalState::Aborted,
        }
    }
}

fn transition(inner: &mut Inner, target: RequestState) {
    if let Err(e) = inner.state.transition_to(target) {
        warn!(key = %inner.key, url = %inner.url, error = %e, "Unexpected request state change");
    }
}

impl Drop for TransferCompletion {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.as_ref() {
            let outcome = Self::dropped_outcome(inner);
            self.finish(outcome);
        }
    }
}
