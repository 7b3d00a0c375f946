//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (CASCADE_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use cascade_core::{FanoutConfig, SignatureScheme};
use cascade_transport::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Webhook authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Fanout configuration.
    #[serde(default)]
    pub fanout: FanoutSettings,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Webhook authentication configuration.
///
/// The active scheme is decided once at startup: an endpoint secret selects
/// the timestamped scheme, otherwise a signing secret selects the generic
/// scheme, otherwise verification is disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Endpoint secret for the timestamped (Stripe-style) scheme.
    #[serde(default = "default_endpoint_secret")]
    pub endpoint_secret: Option<String>,

    /// Signing secret for the generic scheme; ignored when an endpoint
    /// secret is set.
    #[serde(default = "default_signing_secret")]
    pub signing_secret: Option<String>,

    /// Timestamp tolerance for the timestamped scheme, in seconds.
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: u64,
}

impl AuthConfig {
    /// Resolve the configured trust scheme.
    #[must_use]
    pub fn scheme(&self) -> SignatureScheme {
        SignatureScheme::from_secrets(
            self.endpoint_secret.as_deref(),
            self.signing_secret.as_deref(),
            self.tolerance_secs,
        )
    }
}

/// Fanout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutSettings {
    /// Simultaneous outbound pushes per broadcast cycle.
    #[serde(default = "default_max_concurrent_pushes")]
    pub max_concurrent_pushes: usize,

    /// Per-push deadline in milliseconds.
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,

    /// Registry scan page size.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
}

impl FanoutSettings {
    /// Convert to the engine's configuration.
    #[must_use]
    pub fn fanout_config(&self) -> FanoutConfig {
        FanoutConfig {
            max_concurrent_pushes: self.max_concurrent_pushes,
            push_timeout: Duration::from_millis(self.push_timeout_ms),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Outbound messages buffered per connection.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// How long a push may wait for buffer space, in milliseconds.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

impl TransportConfig {
    /// Convert to the gateway's configuration.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            outbound_buffer: self.outbound_buffer,
            enqueue_timeout: Duration::from_millis(self.enqueue_timeout_ms),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("CASCADE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("CASCADE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_endpoint_secret() -> Option<String> {
    std::env::var("CASCADE_ENDPOINT_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
}

fn default_signing_secret() -> Option<String> {
    std::env::var("CASCADE_SIGNING_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
}

fn default_tolerance_secs() -> u64 {
    std::env::var("CASCADE_TOLERANCE_SECS")
        .ok()
        .and_then(|t| t.parse().ok())
        .unwrap_or(300)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_concurrent_pushes() -> usize {
    32
}

fn default_push_timeout_ms() -> u64 {
    10_000
}

fn default_scan_page_size() -> usize {
    128
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_enqueue_timeout_ms() -> u64 {
    1_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth: AuthConfig::default(),
            fanout: FanoutSettings::default(),
            transport: TransportConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            endpoint_secret: default_endpoint_secret(),
            signing_secret: default_signing_secret(),
            tolerance_secs: default_tolerance_secs(),
        }
    }
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            max_concurrent_pushes: default_max_concurrent_pushes(),
            push_timeout_ms: default_push_timeout_ms(),
            scan_page_size: default_scan_page_size(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            outbound_buffer: default_outbound_buffer(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "cascade.toml",
            "/etc/cascade/cascade.toml",
            "~/.config/cascade/cascade.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid host:port")
    }
}
