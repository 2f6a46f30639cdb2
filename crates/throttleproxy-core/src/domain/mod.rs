//! Domain entities
//!
//! - Newtypes for validated keys, rates and request identifiers
//! - Per-request lifecycle state and the terminal transfer record
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod transfer;

// Re-export commonly used types
pub use errors::DomainError;
pub use newtypes::*;
pub use transfer::{
    ByteCount, RequestState, RequestedRate, ResourceName, TerminalState, TransferRecord,
};
