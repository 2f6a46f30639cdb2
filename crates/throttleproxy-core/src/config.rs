//! Configuration module for throttleproxy.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, environment overrides and a builder
//! pattern for programmatic use.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default per-key rate: 1 GiB/s, effectively unthrottled.
pub const DEFAULT_RATE: u64 = 1_073_741_824;

/// Headers dropped from origin responses unless configured otherwise.
pub const DEFAULT_IGNORE_HEADERS: &[&str] = &["server", "date", "x-vtx-location"];

/// Environment variable holding a comma-separated ignore-header list.
pub const ENV_IGNORE_HEADERS: &str = "IGNORE_HEADERS";

/// Environment variable holding the default per-key rate.
pub const ENV_INITIAL_SPEED: &str = "INITIAL_SPEED";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for throttleproxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub throttle: ThrottleConfig,
    pub proxy: ProxyConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Listener settings for the proxy endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the proxy binds, e.g. `0.0.0.0:3000`.
    pub listen: String,
}

/// Throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Rate in bytes per second for keys that never had one set.
    pub default_rate: u64,
    /// Token bucket depth, expressed as milliseconds of traffic at the current rate.
    pub burst_ms: u64,
}

/// Origin forwarding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Response header names dropped before relaying (case-insensitive).
    pub ignore_headers: Vec<String>,
    /// Seconds allowed for establishing an origin connection.
    pub connect_timeout_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

/// Prometheus exposition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Socket address serving `/metrics`.
    pub endpoint: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/throttleproxy/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("throttleproxy")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            default_rate: DEFAULT_RATE,
            burst_ms: 1000,
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ignore_headers: DEFAULT_IGNORE_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            connect_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "127.0.0.1:9100".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

/// Splits a comma-separated header list, trimming and lowercasing each name.
pub fn parse_header_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

impl Config {
    /// Apply `IGNORE_HEADERS` and `INITIAL_SPEED` from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ValidationError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using `lookup` in place of the process environment.
    ///
    /// An unparseable `INITIAL_SPEED` is an error rather than a silent fallback,
    /// so a misconfigured deployment fails at startup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_IGNORE_HEADERS) {
            self.proxy.ignore_headers = parse_header_list(&raw);
        }

        if let Some(raw) = lookup(ENV_INITIAL_SPEED) {
            self.throttle.default_rate =
                raw.trim().parse().map_err(|_| ValidationError {
                    field: "throttle.default_rate".into(),
                    message: format!("{ENV_INITIAL_SPEED} is not an integer: '{raw}'"),
                })?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"throttle.default_rate"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- server ---
        if self.server.listen.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "server.listen".into(),
                message: format!("not a socket address: '{}'", self.server.listen),
            });
        }

        // --- throttle ---
        if self.throttle.default_rate == 0 {
            errors.push(ValidationError {
                field: "throttle.default_rate".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.throttle.burst_ms == 0 {
            errors.push(ValidationError {
                field: "throttle.burst_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- proxy ---
        if self.proxy.connect_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "proxy.connect_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if let Some(bad) = self
            .proxy
            .ignore_headers
            .iter()
            .find(|h| h.trim().is_empty())
        {
            errors.push(ValidationError {
                field: "proxy.ignore_headers".into(),
                message: format!("header names cannot be blank: '{bad}'"),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        // --- metrics ---
        if self.metrics.enabled && self.metrics.endpoint.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "metrics.endpoint".into(),
                message: format!("not a socket address: '{}'", self.metrics.endpoint),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use throttleproxy_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .listen("127.0.0.1:8080")
///     .default_rate(500_000)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- server ---

    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.config.server.listen = addr.into();
        self
    }

    // --- throttle ---

    pub fn default_rate(mut self, bytes_per_second: u64) -> Self {
        self.config.throttle.default_rate = bytes_per_second;
        self
    }

    pub fn burst_ms(mut self, ms: u64) -> Self {
        self.config.throttle.burst_ms = ms;
        self
    }

    // --- proxy ---

    pub fn ignore_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.proxy.ignore_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.proxy.connect_timeout_secs = secs;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- metrics ---

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.metrics.enabled = enabled;
        self
    }

    pub fn metrics_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.metrics.endpoint = endpoint.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
