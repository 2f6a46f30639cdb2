//! Request handling for rate changes and forwarded fetches
//!
//! [`Forwarder`] ties the throttle service, the origin clients and the
//! reporter together. A forward is admitted only once its target resolves;
//! from then on exactly one transfer record is emitted for it.

use std::sync::Arc;
use std::time::Duration;

use hyper::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::Response;
use throttleproxy_core::config::ProxyConfig;
use throttleproxy_core::domain::{ByteCount, TerminalState, ThrottleKey};
use throttleproxy_throttle::{RateChange, ThrottleService};
use tracing::{debug, info};

use crate::body::{self, ProxyBody};
use crate::completion::TransferCompletion;
use crate::report::TransferReporter;
use crate::target::{self, Upstream};
use crate::ProxyError;

/// Connection-scoped headers that never apply to the caller's connection.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Forwarding parameters
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Lowercase response header names dropped before relaying
    pub ignore_headers: Vec<String>,
    pub connect_timeout: Duration,
}

impl From<&ProxyConfig> for ForwarderConfig {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            ignore_headers: config
                .ignore_headers
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

#[derive(Debug)]
pub struct Forwarder {
    service: Arc<ThrottleService>,
    upstream: Upstream,
    ignore_headers: Vec<String>,
    reporter: TransferReporter,
}

impl Forwarder {
    pub fn new(
        service: Arc<ThrottleService>,
        config: ForwarderConfig,
        reporter: TransferReporter,
    ) -> Result<Self, ProxyError> {
        Ok(Self {
            service,
            upstream: Upstream::new(config.connect_timeout)?,
            ignore_headers: config.ignore_headers,
            reporter,
        })
    }

    pub fn service(&self) -> &Arc<ThrottleService> {
        &self.service
    }

    /// Parses and stores a rate for `key`.
    pub fn set_rate(&self, key: &ThrottleKey, input: &str) -> Result<RateChange, ProxyError> {
        match self.service.set_rate(key, input) {
            Ok(change) => {
                self.reporter.record_rate_change(key, &change);
                Ok(change)
            }
            Err(e) => {
                self.reporter.record_rejected_rate(key, &e);
                Err(e.into())
            }
        }
    }

    /// Fetches `target` and returns a response whose body drains through the
    /// key's throttle.
    ///
    /// # Errors
    /// - [`ProxyError::InvalidTarget`] before any state is touched
    /// - [`ProxyError::Upstream`] if the origin sends no response headers
    pub async fn forward(
        &self,
        key: &ThrottleKey,
        target: &str,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let resolved = target::resolve(target)?;
        let url = resolved.url.to_string();

        let (channel, snapshot) = self.service.open_channel(key);
        let guard = self.service.begin_request(key);
        self.reporter.record_start(key, &url, snapshot.rate);

        let mut completion = TransferCompletion::new(
            Arc::clone(&self.service),
            self.reporter.clone(),
            guard,
            snapshot,
            url.clone(),
        );
        completion.mark_in_flight();

        debug!(key = %key, url = %url, transport = %resolved.transport, "Fetching from origin");
        let origin = match self.upstream.fetch(&resolved).await {
            Ok(origin) => origin,
            Err(source) => {
                completion.finish(TerminalState::Errored);
                return Err(ProxyError::Upstream { url, source });
            }
        };

        let status = origin.status();
        if !status.is_success() {
            info!(key = %key, status = status.as_u16(), "Got status code {} for {}", status.as_u16(), url);
        }

        let headers = relay_headers(origin.headers(), &self.ignore_headers);
        completion.headers_received(
            status.as_u16(),
            content_type(origin.headers()),
            declared_size(origin.headers()),
        );

        let mut response = Response::new(body::relay(origin.bytes_stream(), channel, completion));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Copies origin headers, dropping ignored and hop-by-hop names.
///
/// `ignore` must already be lowercase. Repeated headers keep every value.
pub fn relay_headers(origin: &HeaderMap, ignore: &[String]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(origin.len());
    for (name, value) in origin {
        let name_str = name.as_str();
        if HOP_BY_HOP.contains(&name_str) || ignore.iter().any(|h| h == name_str) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn declared_size(headers: &HeaderMap) -> ByteCount {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .into()
}
