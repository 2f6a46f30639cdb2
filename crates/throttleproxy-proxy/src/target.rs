//! Target resolution and origin clients
//!
//! A target that already carries a `scheme://` prefix is used as given;
//! one whose prefix only appears once percent-decoded is decoded first, and
//! anything else is assumed to be `https://`. The resolved scheme picks the
//! transport exactly, so an `http` target is never upgraded and an `https`
//! target never falls back to plain text.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::Client;
use url::Url;

use crate::ProxyError;

const DEFAULT_SCHEME: &str = "https://";

/// Transport used to reach the origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Https,
}

impl Display for Transport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Http => f.write_str("http"),
            Transport::Https => f.write_str("https"),
        }
    }
}

/// A fully resolved origin URL and the transport it requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub url: Url,
    pub transport: Transport,
}

/// Returns true if `fragment` starts with something shaped like `scheme://`.
fn has_scheme(fragment: &str) -> bool {
    let Some((scheme, _)) = fragment.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolves a target fragment into an origin URL.
///
/// # Errors
/// [`ProxyError::InvalidTarget`] if the URL does not parse, has no host, or
/// uses a scheme other than `http` or `https`.
pub fn resolve(fragment: &str) -> Result<ResolvedTarget, ProxyError> {
    let candidate = if has_scheme(fragment) {
        fragment.to_string()
    } else {
        match urlencoding::decode(fragment) {
            Ok(decoded) if has_scheme(&decoded) => decoded.into_owned(),
            _ => format!("{DEFAULT_SCHEME}{fragment}"),
        }
    };

    let invalid = |reason: String| ProxyError::InvalidTarget {
        target: fragment.to_string(),
        reason,
    };

    let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
    let transport = match url.scheme() {
        "http" => Transport::Http,
        "https" => Transport::Https,
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(ResolvedTarget { url, transport })
}

// ============================================================================
// Origin clients
// ============================================================================

/// One client per transport.
///
/// Neither follows redirects or decodes content, so the caller sees exactly
/// what the origin sent.
#[derive(Debug, Clone)]
pub struct Upstream {
    plain: Client,
    tls: Client,
}

impl Upstream {
    pub fn new(connect_timeout: Duration) -> Result<Self, ProxyError> {
        let plain = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(connect_timeout)
            .no_proxy()
            .build()
            .map_err(ProxyError::Client)?;
        let tls = Client::builder()
            .redirect(Policy::none())
            .connect_timeout(connect_timeout)
            .https_only(true)
            .no_proxy()
            .build()
            .map_err(ProxyError::Client)?;
        Ok(Self { plain, tls })
    }

    pub fn client(&self, transport: Transport) -> &Client {
        match transport {
            Transport::Http => &self.plain,
            Transport::Https => &self.tls,
        }
    }

    /// Issues the origin GET and waits for response headers.
    pub async fn fetch(&self, target: &ResolvedTarget) -> reqwest::Result<reqwest::Response> {
        self.client(target.transport)
            .get(target.url.clone())
            .send()
            .await
    }
}
