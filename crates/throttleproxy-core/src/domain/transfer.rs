//! Per-request lifecycle and transfer bookkeeping
//!
//! A forwarded request moves through `Created → InFlight → terminal`, where
//! the terminal state is one of Completed, Aborted or Errored. When the
//! terminal state is reached a [`TransferRecord`] is built, reported once,
//! and discarded.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{BytesPerSecond, RequestId, ThrottleKey};

// ============================================================================
// Request state machine
// ============================================================================

/// Final classification of a forwarded request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    /// The origin finished sending the body cleanly
    Completed,
    /// The caller went away before the transfer finished
    Aborted,
    /// A network or transport failure ended the transfer
    Errored,
}

impl TerminalState {
    /// Lowercase name, used for metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Completed => "completed",
            TerminalState::Aborted => "aborted",
            TerminalState::Errored => "errored",
        }
    }
}

impl Display for TerminalState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminalState::Completed => "Completed",
            TerminalState::Aborted => "Aborted",
            TerminalState::Errored => "Errored",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of one forwarded request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestState {
    /// Accepted, origin fetch not yet issued
    #[default]
    Created,
    /// Origin fetch issued; bytes may be flowing
    InFlight,
    /// Terminal; no further transitions
    Finished(TerminalState),
}

impl RequestState {
    /// Returns the state name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            RequestState::Created => "Created",
            RequestState::InFlight => "InFlight",
            RequestState::Finished(TerminalState::Completed) => "Completed",
            RequestState::Finished(TerminalState::Aborted) => "Aborted",
            RequestState::Finished(TerminalState::Errored) => "Errored",
        }
    }

    /// Returns true once a terminal state has been reached
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Finished(_))
    }

    /// Checks whether moving to `target` is allowed.
    ///
    /// A request that fails before its fetch is issued (for example a
    /// connection refused while dialing) may finish directly from `Created`
    /// with `Aborted` or `Errored`; it can never complete without going
    /// through `InFlight`.
    pub fn can_transition_to(&self, target: &RequestState) -> bool {
        match (self, target) {
            (RequestState::Finished(_), _) => false,
            (RequestState::Created, RequestState::InFlight) => true,
            (RequestState::Created, RequestState::Finished(TerminalState::Completed)) => false,
            (RequestState::Created, RequestState::Finished(_)) => true,
            (RequestState::InFlight, RequestState::Finished(_)) => true,
            _ => false,
        }
    }

    /// Transition to `target`, or return `DomainError::InvalidState`
    pub fn transition_to(&mut self, target: RequestState) -> Result<(), DomainError> {
        if !self.can_transition_to(&target) {
            return Err(DomainError::InvalidState {
                from: self.name().to_string(),
                to: target.name().to_string(),
            });
        }
        *self = target;
        Ok(())
    }
}

// ============================================================================
// Record fields
// ============================================================================

/// Size of a transfer as declared by the origin's length header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteCount {
    /// Length header was present and parseable
    Known(u64),
    /// No usable length header; reported distinctly from zero
    Unknown,
}

impl ByteCount {
    /// Returns the known value, if any
    pub fn known(&self) -> Option<u64> {
        match self {
            ByteCount::Known(n) => Some(*n),
            ByteCount::Unknown => None,
        }
    }
}

impl From<Option<u64>> for ByteCount {
    fn from(value: Option<u64>) -> Self {
        value.map_or(ByteCount::Unknown, ByteCount::Known)
    }
}

impl Display for ByteCount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ByteCount::Known(n) => write!(f, "{n}"),
            ByteCount::Unknown => f.write_str("unknown"),
        }
    }
}

/// The rate a request was started under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestedRate {
    /// The key's rate did not change during the transfer
    Known(BytesPerSecond),
    /// The key's rate changed mid-transfer, so neither value describes it
    Unreliable,
}

impl Display for RequestedRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RequestedRate::Known(rate) => write!(f, "{rate}"),
            RequestedRate::Unreliable => f.write_str("unreliable"),
        }
    }
}

// ============================================================================
// TransferRecord
// ============================================================================

/// Everything known about one forwarded request at its terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub request_id: RequestId,
    pub key: ThrottleKey,
    /// Fully resolved target URL
    pub url: String,
    /// Origin status code, if response headers arrived
    pub status: Option<u16>,
    pub content_type: Option<String>,
    /// Size declared by the origin's length header
    pub size: ByteCount,
    /// Bytes actually released to the caller
    pub bytes_relayed: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub requested_rate: RequestedRate,
    pub outcome: TerminalState,
}

impl TransferRecord {
    /// Achieved throughput in bytes per second.
    ///
    /// `None` when no time has elapsed, since the quotient is undefined.
    pub fn achieved_rate(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            Some(self.bytes_relayed as f64 / secs)
        } else {
            None
        }
    }

    /// Splits the target into a resource name and file extension.
    ///
    /// The extension is taken from the last path segment only, so dots in the
    /// host name are never mistaken for one.
    pub fn resource(&self) -> ResourceName {
        ResourceName::from_url(&self.url)
    }
}

/// Resource identity derived from a target URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    /// URL without query string or fragment, and without the extension
    pub stem: String,
    pub extension: Option<String>,
}

impl ResourceName {
    /// Derive a resource name from a URL string
    pub fn from_url(url: &str) -> Self {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);
        let path_start = without_query
            .find("://")
            .map(|i| i + 3)
            .and_then(|authority| without_query[authority..].find('/').map(|p| authority + p));

        if let Some(path_start) = path_start {
            let last_segment_start = without_query
                .rfind('/')
                .map_or(path_start, |i| i.max(path_start) + 1);
            let last_segment = &without_query[last_segment_start..];
            if let Some(dot) = last_segment.rfind('.') {
                let ext = &last_segment[dot + 1..];
                if dot > 0 && !ext.is_empty() {
                    return Self {
                        stem: without_query[..last_segment_start + dot].to_string(),
                        extension: Some(ext.to_string()),
                    };
                }
            }
        }

        Self {
            stem: without_query.to_string(),
            extension: None,
        }
    }
}

impl Display for ResourceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.extension {
            Some(ext) => write!(f, "{}.{}", self.stem, ext),
            None => f.write_str(&self.stem),
        }
    }
}
