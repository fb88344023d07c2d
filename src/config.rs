//! Configuration loading.
//!
//! Loads bridge configuration from `./sprawl.toml` (or `$SPRAWL_CONFIG_PATH`).
//! Environment variables override file values; file values override
//! defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::connection::{ConnectionConfig, DEFAULT_RECONNECT_INTERVAL};

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Transport settings for the protocol connection.
    pub connection: ConnectionSettings,
    /// Event bus settings.
    pub events: EventSettings,
}

/// Transport settings as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// WebSocket endpoint to dial.
    pub endpoint: String,
    /// Bearer token for the `Authorization` header.
    pub access_token: Option<String>,
    /// Seconds between reconnect attempts.
    pub reconnect_secs: u64,
    /// Treat unknown frame discriminators as errors instead of warnings.
    pub strict_frames: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:6700".to_owned(),
            access_token: None,
            reconnect_secs: DEFAULT_RECONNECT_INTERVAL.as_secs(),
            strict_frames: false,
        }
    }
}

impl ConnectionSettings {
    /// Validate and convert into a [`ConnectionConfig`].
    pub fn connection_config(&self) -> Result<ConnectionConfig> {
        let endpoint = Url::parse(&self.endpoint)
            .with_context(|| format!("invalid endpoint '{}'", self.endpoint))?;
        let mut config = ConnectionConfig::new(endpoint)
            .with_reconnect_interval(Duration::from_secs(self.reconnect_secs))
            .with_strict_frames(self.strict_frames);
        if let Some(token) = &self.access_token {
            config = config.with_access_token(token.clone());
        }
        Ok(config)
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Buffered events on the bus before connection readers back-pressure.
    pub buffer: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self { buffer: 256 }
    }
}

impl BridgeConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$SPRAWL_CONFIG_PATH` or `./sprawl.toml`. A
    /// missing file yields defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        Self::load_from_path(&path)
    }

    /// Load from a specific TOML file, no env overrides. A missing file
    /// yields defaults.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: BridgeConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(BridgeConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        match env("SPRAWL_CONFIG_PATH") {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from("sprawl.toml"),
        }
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = env("SPRAWL_ENDPOINT") {
            self.connection.endpoint = endpoint;
        }
        if let Some(token) = env("SPRAWL_ACCESS_TOKEN") {
            self.connection.access_token = Some(token);
        }
        if let Some(secs) = env("SPRAWL_RECONNECT_SECS") {
            match secs.parse() {
                Ok(secs) => self.connection.reconnect_secs = secs,
                Err(_) => {
                    tracing::warn!(value = %secs, "ignoring invalid SPRAWL_RECONNECT_SECS")
                }
            }
        }
        if let Some(strict) = env("SPRAWL_STRICT_FRAMES") {
            self.connection.strict_frames = matches!(strict.as_str(), "1" | "true" | "yes");
        }
    }
}
