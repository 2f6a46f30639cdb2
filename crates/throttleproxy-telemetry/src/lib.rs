//! throttleproxy Telemetry - Prometheus metrics
//!
//! Provides:
//! - `MetricsRegistry`: counters, gauge and histogram for proxied transfers
//! - `MetricsServer`: HTTP server for Prometheus scraping

pub mod metrics;
pub mod server;

pub use metrics::MetricsRegistry;
pub use server::MetricsServer;
