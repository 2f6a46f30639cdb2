//! throttleproxy Daemon - bandwidth-throttling forwarding proxy
//!
//! This binary:
//! - Loads YAML configuration, then applies `IGNORE_HEADERS` and
//!   `INITIAL_SPEED` from the environment and any command-line overrides
//! - Serves the proxy endpoint until SIGTERM/SIGINT
//! - Optionally serves Prometheus metrics on a separate listener
//!
//! # Architecture
//!
//! One [`ThrottleService`] is shared by every connection. Both servers watch
//! a `CancellationToken` that is cancelled on receipt of SIGTERM or SIGINT.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use throttleproxy_core::config::Config;
use throttleproxy_proxy::{Forwarder, ForwarderConfig, ProxyServer, TransferReporter};
use throttleproxy_telemetry::{MetricsRegistry, MetricsServer};
use throttleproxy_throttle::{ThrottleService, ThrottleSettings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "throttleproxyd", version, about = "Bandwidth-throttling forwarding proxy")]
struct Args {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the config file
    #[arg(long)]
    listen: Option<String>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

// ============================================================================
// Configuration
// ============================================================================

/// Builds the effective configuration.
///
/// Precedence, lowest first: defaults, config file, environment, flags.
fn resolve_config<F>(args: &Args, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path()),
    };

    config.apply_overrides_from(lookup)?;

    if let Some(listen) = &args.listen {
        config.server.listen = listen.clone();
    }
    if args.json_logs {
        config.logging.format = "json".to_string();
    }

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration: {}", details.join("; "));
    }

    Ok(config)
}

/// Log level from the config, raised by each `-v`.
fn log_level(configured: &str, verbose: u8) -> &str {
    match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    }
}

fn init_tracing(config: &Config, verbose: u8) {
    let level = log_level(&config.logging.level, verbose);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// ProxyDaemon
// ============================================================================

/// Owns the shared throttle state and both servers.
struct ProxyDaemon {
    config: Config,
    service: Arc<ThrottleService>,
    metrics: Option<Arc<MetricsRegistry>>,
    shutdown: CancellationToken,
}

impl ProxyDaemon {
    fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let settings =
            ThrottleSettings::from_config(&config.throttle).context("Invalid throttle settings")?;
        let service = Arc::new(ThrottleService::new(settings));

        let metrics = if config.metrics.enabled {
            Some(Arc::new(
                MetricsRegistry::new().context("Failed to create metrics registry")?,
            ))
        } else {
            None
        };

        Ok(Self {
            config,
            service,
            metrics,
            shutdown,
        })
    }

    /// Serves until the shutdown token is cancelled.
    async fn run(&self) -> Result<()> {
        let reporter = match &self.metrics {
            Some(metrics) => {
                self.spawn_metrics_server(Arc::clone(metrics))?;
                TransferReporter::with_metrics(Arc::clone(metrics))
            }
            None => TransferReporter::new(),
        };

        let forwarder = Forwarder::new(
            Arc::clone(&self.service),
            ForwarderConfig::from(&self.config.proxy),
            reporter,
        )
        .context("Failed to create forwarder")?;

        info!(
            listen = %self.config.server.listen,
            default_rate = self.config.throttle.default_rate,
            ignore_headers = ?self.config.proxy.ignore_headers,
            "Starting proxy"
        );

        ProxyServer::new(Arc::new(forwarder), &self.config.server.listen)
            .context("Invalid listen address")?
            .run(self.shutdown.clone())
            .await
            .context("Proxy server failed")
    }

    fn spawn_metrics_server(&self, metrics: Arc<MetricsRegistry>) -> Result<()> {
        let server = MetricsServer::new(metrics, &self.config.metrics.endpoint)
            .context("Invalid metrics endpoint")?;
        let token = self.shutdown.child_token();

        tokio::spawn(async move {
            if let Err(e) = server.run(token).await {
                error!(error = %e, "Metrics server failed");
            }
        });
        Ok(())
    }
}

// ============================================================================
// Signal handling
// ============================================================================

/// Waits for SIGTERM or SIGINT, then cancels `token`.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args, |name| std::env::var(name).ok())?;
    init_tracing(&config, args.verbose);

    info!("throttleproxy daemon starting (throttleproxyd)");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let daemon = ProxyDaemon::new(config, shutdown_token)?;
    let result = daemon.run().await;

    match &result {
        Ok(()) => info!("throttleproxy daemon shut down gracefully"),
        Err(e) => error!(error = %e, "throttleproxy daemon exiting with error"),
    }

    result
}
