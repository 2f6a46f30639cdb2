//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the values that flow through the proxy engine.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// RequestId
// ============================================================================

/// Identifier attached to one forwarded request for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new random RequestId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RequestId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid RequestId: {e}")))
    }
}

// ============================================================================
// ThrottleKey
// ============================================================================

/// Caller-supplied identity naming one throttling domain.
///
/// Keys are opaque: any non-empty string without a `/` is accepted. A key
/// comes into existence the first time it is referenced and lives for the
/// lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThrottleKey(String);

impl ThrottleKey {
    /// Create a new ThrottleKey after validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidKey` if the key is empty or contains `/`
    pub fn new(key: impl Into<String>) -> Result<Self, DomainError> {
        let key = key.into();
        if key.is_empty() {
            return Err(DomainError::InvalidKey("key cannot be empty".to_string()));
        }
        if key.contains('/') {
            return Err(DomainError::InvalidKey(format!(
                "key cannot contain '/': {key}"
            )));
        }
        Ok(Self(key))
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ThrottleKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ThrottleKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ThrottleKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ThrottleKey> for String {
    fn from(key: ThrottleKey) -> Self {
        key.0
    }
}

impl AsRef<str> for ThrottleKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// BytesPerSecond
// ============================================================================

/// A target transfer rate in bytes per second. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct BytesPerSecond(NonZeroU64);

impl BytesPerSecond {
    /// Create a rate from a raw byte count
    ///
    /// # Errors
    /// Returns `DomainError::NonPositiveRate` for zero
    pub fn new(bytes: u64) -> Result<Self, DomainError> {
        NonZeroU64::new(bytes)
            .map(Self)
            .ok_or_else(|| DomainError::NonPositiveRate(bytes.to_string()))
    }

    /// Get the rate as a plain integer
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Get the rate as a float, for token arithmetic
    #[must_use]
    pub fn as_f64(self) -> f64 {
        self.0.get() as f64
    }
}

impl Display for BytesPerSecond {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BytesPerSecond {
    type Err = DomainError;

    /// Parses a base-10 unsigned integer after trimming surrounding whitespace.
    ///
    /// Inputs such as `"12abc"`, `"-5"` or `"1.5"` are rejected rather than
    /// truncated to their numeric prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(digits) = trimmed.strip_prefix('-') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(DomainError::NonPositiveRate(s.to_string()));
            }
        }
        let value: u64 = trimmed
            .parse()
            .map_err(|_| DomainError::InvalidRate(s.to_string()))?;
        Self::new(value).map_err(|_| DomainError::NonPositiveRate(s.to_string()))
    }
}

impl TryFrom<u64> for BytesPerSecond {
    type Error = DomainError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BytesPerSecond> for u64 {
    fn from(rate: BytesPerSecond) -> Self {
        rate.get()
    }
}
