//! Shared helpers for proxy integration tests
//!
//! [`spawn_proxy`] starts a proxy on `127.0.0.1:0` and hands back its
//! address along with the shared service and metrics so tests can inspect
//! state directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

use throttleproxy_core::config::Config;
use throttleproxy_core::domain::ThrottleKey;
use throttleproxy_proxy::{Forwarder, ForwarderConfig, ProxyServer, TransferReporter};
use throttleproxy_telemetry::MetricsRegistry;
use throttleproxy_throttle::{ThrottleService, ThrottleSettings};

pub struct TestProxy {
    pub addr: SocketAddr,
    pub service: Arc<ThrottleService>,
    pub metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
}

impl TestProxy {
    /// `http://127.0.0.1:<port>{path}`
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Forward URL for `key` fetching `target`.
    pub fn proxy_url(&self, key: &str, target: &str) -> String {
        self.url(&format!("/{key}/proxy/{target}"))
    }

    pub fn speed_url(&self, key: &str, rate: &str) -> String {
        self.url(&format!("/{key}/speed/{rate}"))
    }

    pub fn in_flight(&self, key: &str) -> usize {
        self.service.in_flight(&ThrottleKey::new(key).unwrap())
    }

    pub fn transfers(&self, outcome: &str) -> u64 {
        self.metrics
            .transfers_total
            .with_label_values(&[outcome])
            .get()
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Starts a proxy for `config` on an ephemeral loopback port.
pub async fn spawn_proxy(config: Config) -> TestProxy {
    let settings = ThrottleSettings::from_config(&config.throttle).expect("throttle settings");
    let service = Arc::new(ThrottleService::new(settings));
    let metrics = Arc::new(MetricsRegistry::new().expect("metrics registry"));
    let forwarder = Forwarder::new(
        Arc::clone(&service),
        ForwarderConfig::from(&config.proxy),
        TransferReporter::with_metrics(Arc::clone(&metrics)),
    )
    .expect("forwarder");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = ProxyServer::new(Arc::new(forwarder), &addr.to_string()).expect("server");
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run_with_listener(listener, shutdown).await });
    }

    TestProxy {
        addr,
        service,
        metrics,
        shutdown,
    }
}

/// Origin target for `path` on a wiremock server, scheme included.
pub fn origin_target(server: &MockServer, path: &str) -> String {
    format!("{}{}", server.uri(), path)
}

/// A client that never reuses connections, so each request is independent.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .expect("client")
}

/// Polls `check` every 20 ms until it holds or `timeout` passes.
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
