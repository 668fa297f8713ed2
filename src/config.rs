//! ==============================================================================
//! config.rs - Dashboard Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `dashboard.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - StreamConfig: websocket URL and reconnect backoff bounds.
//!     - BackendConfig: REST base URL and polling cadence.
//!     - ServerConfig: where the dashboard listens.
//!     - LoggingConfig: default log level.
//!
//! every section and field is optional; missing values take the defaults below.
//! DESKBUDDY_STREAM_URL / DESKBUDDY_BACKEND_URL override the file.
//!
//! ==============================================================================

use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::DEFAULT_BAUDRATE;
use crate::stream::BackoffPolicy;

pub const CONFIG_ENV: &str = "DESKBUDDY_CONFIG";
pub const STREAM_URL_ENV: &str = "DESKBUDDY_STREAM_URL";
pub const BACKEND_URL_ENV: &str = "DESKBUDDY_BACKEND_URL";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub stream: StreamConfig,
    pub backend: BackendConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub health_interval_seconds: u64,
    pub serial_poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub baudrate: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/stream".to_string(),
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            health_interval_seconds: 10,
            serial_poll_interval_ms: 1_000,
            request_timeout_ms: 5_000,
            baudrate: DEFAULT_BAUDRATE,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_sensor_data: true,
        }
    }
}

impl StreamConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.initial_delay_ms, self.max_delay_ms)
    }
}

impl BackendConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_seconds.max(1))
    }

    pub fn serial_poll_interval(&self) -> Duration {
        Duration::from_millis(self.serial_poll_interval_ms.max(100))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

/// where the active configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// a file was found but could not be used
    Rejected { path: PathBuf, error: String },
    Defaults,
}

impl DashboardConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: DashboardConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load with default fallback
    ///
    /// runs before logging is up, so the outcome is returned instead of logged.
    pub fn load_or_default() -> (Self, ConfigSource) {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("config").join("dashboard.toml"));
        paths.push(PathBuf::from("..").join("config").join("dashboard.toml"));

        let (mut config, source) = paths
            .into_iter()
            .find(|p| p.exists())
            .map(|path| match Self::load(&path) {
                Ok(config) => (config, ConfigSource::File(path)),
                Err(e) => (
                    Self::default(),
                    ConfigSource::Rejected {
                        path,
                        error: format!("{e:#}"),
                    },
                ),
            })
            .unwrap_or_else(|| (Self::default(), ConfigSource::Defaults));

        config.apply_env(|key| std::env::var(key).ok());
        (config, source)
    }

    /// Apply environment overrides; `lookup` is `std::env::var` outside tests
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(STREAM_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.stream.url = url;
        }
        if let Some(url) = lookup(BACKEND_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.backend.base_url = url;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stream.initial_delay_ms == 0 {
            bail!("stream.initial_delay_ms must be greater than zero");
        }
        if self.stream.max_delay_ms < self.stream.initial_delay_ms {
            bail!(
                "stream.max_delay_ms ({}) is below stream.initial_delay_ms ({})",
                self.stream.max_delay_ms,
                self.stream.initial_delay_ms
            );
        }
        Ok(())
    }

    /// One-line summary for the startup log
    pub fn summary(&self) -> String {
        format!(
            "stream={} backoff={}..{}ms backend={} bind={} log={}",
            self.stream.url,
            self.stream.initial_delay_ms,
            self.stream.max_delay_ms,
            self.backend.base_url,
            self.server.bind,
            self.logging.level
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = DashboardConfig::from_toml("").expect("empty config is valid");
        assert_eq!(config, DashboardConfig::default());
        assert_eq!(config.stream.url, "ws://localhost:8000/stream");
        assert_eq!(config.stream.backoff(), BackoffPolicy::new(500, 5_000));
        assert_eq!(config.backend.health_interval(), Duration::from_secs(10));
        assert_eq!(config.backend.serial_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.backend.baudrate, DEFAULT_BAUDRATE);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = DashboardConfig::from_toml(
            r#"
            [stream]
            url = "ws://deskbuddy.lan:8000/stream"

            [server]
            bind = "127.0.0.1:8080"
            "#,
        )
        .expect("partial config is valid");

        assert_eq!(config.stream.url, "ws://deskbuddy.lan:8000/stream");
        assert_eq!(config.stream.initial_delay_ms, 500);
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.backend.base_url, "http://127.0.0.1:8000");
        assert!(config.logging.show_sensor_data);
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let err = DashboardConfig::from_toml(
            r#"
            [stream]
            initial_delay_ms = 2000
            max_delay_ms = 1000
            "#,
        )
        .expect_err("max below initial must fail");
        assert!(err.to_string().contains("max_delay_ms"));

        assert!(DashboardConfig::from_toml("[stream]\ninitial_delay_ms = 0").is_err());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(DashboardConfig::from_toml("[stream\nurl = ").is_err());
        assert!(DashboardConfig::from_toml("[backend]\nbaudrate = \"fast\"").is_err());
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("config")
            .join("dashboard.toml");
        let config = DashboardConfig::load(&path).expect("shipped config loads");
        assert_eq!(config, DashboardConfig::default());
    }

    #[test]
    fn env_overrides_urls() {
        let mut config = DashboardConfig::default();
        config.apply_env(|key| match key {
            STREAM_URL_ENV => Some("ws://10.0.0.5:8000/stream".to_string()),
            BACKEND_URL_ENV => Some("  ".to_string()),
            _ => None,
        });

        assert_eq!(config.stream.url, "ws://10.0.0.5:8000/stream");
        assert_eq!(config.backend.base_url, "http://127.0.0.1:8000");
    }
}
