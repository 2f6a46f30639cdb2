//! Domain error types
//!
//! This module defines error types specific to domain operations: rejected
//! rate inputs, malformed keys and invalid request state transitions.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rate input is not a base-10 unsigned integer
    #[error("Couldn't parse integer from string '{0}'")]
    InvalidRate(String),

    /// Rate input parsed but is not strictly positive
    #[error("Throttle rate must be a positive integer, got '{0}'")]
    NonPositiveRate(String),

    /// Throttle key is empty or contains a path separator
    #[error("Invalid throttle key: {0}")]
    InvalidKey(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

impl DomainError {
    /// Returns true for both kinds of rejected rate input.
    pub fn is_rate_error(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidRate(_) | DomainError::NonPositiveRate(_)
        )
    }
}
