//! Integration tests for throttleproxy-proxy
//!
//! Runs a real proxy server on a loopback port in front of wiremock origins
//! and drives it over HTTP with reqwest.

mod common;

mod test_forward;
mod test_rate;
mod test_throttle;
