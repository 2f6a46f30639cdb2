//! throttleproxy Proxy - throttled HTTP forwarding
//!
//! Accepts two kinds of request:
//! - `GET /{key}/speed/{rate}` stores a target rate for a key
//! - `GET /{key}/proxy/{target...}` fetches the target and streams it back
//!   through the key's shared throttle
//!
//! ## Modules
//!
//! - [`route`] - request path parsing
//! - [`target`] - target URL resolution and origin clients
//! - [`forward`] - the [`Forwarder`] handling one request end to end
//! - [`body`] - outbound body types, including the throttled relay body
//! - [`completion`] - exactly-once terminal bookkeeping for a request
//! - [`report`] - structured transfer and rate-change records
//! - [`server`] - hyper accept loop

pub mod body;
pub mod completion;
pub mod forward;
pub mod report;
pub mod route;
pub mod server;
pub mod target;

use hyper::StatusCode;
use thiserror::Error;
use throttleproxy_core::domain::DomainError;

pub use forward::{Forwarder, ForwarderConfig};
pub use report::TransferReporter;
pub use server::ProxyServer;

/// Errors surfaced to the caller of the proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Rejected key or rate input
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Target could not be turned into an http or https URL
    #[error("Invalid target URL '{target}': {reason}")]
    InvalidTarget {
        /// The target as requested
        target: String,
        /// Why it was rejected
        reason: String,
    },

    /// The origin could not be reached or sent no response headers
    #[error("Error getting {url} from server: {source}")]
    Upstream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The origin body failed after headers were relayed
    #[error("Error relaying {url}: {source}")]
    Relay {
        url: String,
        #[source]
        source: BoxError,
    },

    /// An origin client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed,
}

impl ProxyError {
    /// Status code sent to the caller for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Domain(_) | ProxyError::InvalidTarget { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Upstream { .. } | ProxyError::Relay { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Type-erased error from an origin body stream
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
