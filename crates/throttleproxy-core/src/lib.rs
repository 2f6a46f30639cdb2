//! throttleproxy Core - Domain types and configuration
//!
//! This crate holds everything the proxy engine shares between its layers:
//! - **Domain newtypes** - `ThrottleKey`, `BytesPerSecond`, `RequestId`
//! - **Transfer bookkeeping** - `TransferRecord`, `RequestState`, `TerminalState`
//! - **Configuration** - typed YAML config with env overrides and validation
//! - **Formatting** - binary byte-size formatting for log and response messages
//!
//! It has no knowledge of HTTP or of the async runtime; the throttle, proxy and
//! telemetry crates build on top of it.

pub mod config;
pub mod domain;
pub mod format;
