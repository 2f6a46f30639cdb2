//! Request path parsing
//!
//! The first path segment is always the key. It is percent-decoded and may
//! not contain `/` after decoding. The target of a forward request is taken
//! verbatim, with the inbound query string appended; decoding it is left to
//! target resolution.

use std::borrow::Cow;

use throttleproxy_core::domain::ThrottleKey;

use crate::ProxyError;

const SPEED_PREFIX: &str = "speed/";
const PROXY_PREFIX: &str = "proxy/";

/// What a request path asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/{key}/speed/{rate}`
    SetRate { key: ThrottleKey, rate: String },
    /// `/{key}/proxy/{target...}`
    Forward { key: ThrottleKey, target: String },
}

impl Route {
    /// Parses a request path and optional query string.
    ///
    /// Paths matching neither form yield [`ProxyError::NotFound`]; a key that
    /// fails validation yields [`ProxyError::Domain`].
    pub fn parse(path: &str, query: Option<&str>) -> Result<Self, ProxyError> {
        let rest = path.strip_prefix('/').ok_or(ProxyError::NotFound)?;
        let (raw_key, rest) = rest.split_once('/').ok_or(ProxyError::NotFound)?;
        if raw_key.is_empty() {
            return Err(ProxyError::NotFound);
        }

        if let Some(raw_rate) = rest.strip_prefix(SPEED_PREFIX) {
            if raw_rate.is_empty() || raw_rate.contains('/') {
                return Err(ProxyError::NotFound);
            }
            return Ok(Route::SetRate {
                key: decode_key(raw_key)?,
                rate: decode(raw_rate).into_owned(),
            });
        }

        if let Some(target) = rest.strip_prefix(PROXY_PREFIX) {
            if target.is_empty() {
                return Err(ProxyError::NotFound);
            }
            let mut target = target.to_string();
            if let Some(query) = query.filter(|q| !q.is_empty()) {
                target.push('?');
                target.push_str(query);
            }
            return Ok(Route::Forward {
                key: decode_key(raw_key)?,
                target,
            });
        }

        Err(ProxyError::NotFound)
    }

    pub fn key(&self) -> &ThrottleKey {
        match self {
            Route::SetRate { key, .. } | Route::Forward { key, .. } => key,
        }
    }
}

/// Percent-decodes a segment, keeping the raw text if it is not valid UTF-8.
fn decode(segment: &str) -> Cow<'_, str> {
    urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment))
}

fn decode_key(raw: &str) -> Result<ThrottleKey, ProxyError> {
    Ok(ThrottleKey::new(decode(raw).into_owned())?)
}
