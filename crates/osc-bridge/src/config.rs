// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Supports both programmatic and file-based configuration. A config is
//! read once when the relay is built and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default heartbeat period in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge name (for identification in logs).
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Where the bridge listens for OSC datagrams from the controller.
    #[serde(default)]
    pub udp_server: EndpointConfig,

    /// The controller's listening address; WebSocket traffic goes there.
    #[serde(default)]
    pub udp_client: RemoteConfig,

    /// Where WebSocket clients connect.
    #[serde(default)]
    pub ws_server: WsServerConfig,

    /// Periodic `/ping` towards WebSocket clients.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Queue depth between transports (per WebSocket client and towards UDP).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Statistics reporting interval (seconds, 0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bridge_name() -> String {
    "osc-bridge".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_stats_interval() -> u64 {
    0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_localhost() -> String {
    "localhost".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            udp_server: EndpointConfig::default(),
            udp_client: RemoteConfig::default(),
            ws_server: WsServerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            channel_capacity: default_channel_capacity(),
            stats_interval_secs: default_stats_interval(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loopback-only bridge on ephemeral ports, forwarding to `remote_port`.
    #[cfg(test)]
    pub(crate) fn loopback(remote_port: u16) -> Self {
        Self {
            udp_server: EndpointConfig::new("127.0.0.1", 0),
            udp_client: RemoteConfig::new("127.0.0.1", remote_port),
            ws_server: WsServerConfig::new("127.0.0.1", 0),
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.udp_server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("udp_server.host is empty".into()));
        }
        if self.udp_client.host.trim().is_empty() {
            return Err(ConfigError::Invalid("udp_client.host is empty".into()));
        }
        if self.ws_server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("ws_server.host is empty".into()));
        }
        if self.udp_client.port == 0 {
            return Err(ConfigError::Invalid(
                "udp_client.port must be a concrete port".into(),
            ));
        }
        if self.ws_server.max_clients == 0 {
            return Err(ConfigError::Invalid("ws_server.max_clients is 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity is 0".into()));
        }
        if self.heartbeat.enabled && self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Local UDP listen endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Host or IP to bind.
    #[serde(default = "default_localhost")]
    pub host: String,

    /// Port to bind (0 picks an ephemeral port).
    #[serde(default = "default_udp_server_port")]
    pub port: u16,

    /// Refuse to share the port with other sockets (no `SO_REUSEADDR`).
    #[serde(default)]
    pub exclusive: bool,
}

fn default_udp_server_port() -> u16 {
    8000
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_udp_server_port(),
            exclusive: false,
        }
    }
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            exclusive: false,
        }
    }

    /// Set the exclusive flag.
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// `host:port` for display.
    pub fn display_addr(&self) -> String {
        display_addr(&self.host, self.port)
    }
}

/// Remote UDP peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_localhost")]
    pub host: String,

    #[serde(default = "default_udp_client_port")]
    pub port: u16,
}

fn default_udp_client_port() -> u16 {
    9000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_udp_client_port(),
        }
    }
}

impl RemoteConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn display_addr(&self) -> String {
        display_addr(&self.host, self.port)
    }
}

/// WebSocket listen endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsServerConfig {
    #[serde(default = "default_localhost")]
    pub host: String,

    #[serde(default = "default_ws_port")]
    pub port: u16,

    /// Maximum concurrent WebSocket connections.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

fn default_ws_port() -> u16 {
    8080
}

fn default_max_clients() -> usize {
    100
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_ws_port(),
            max_clients: default_max_clients(),
        }
    }
}

impl WsServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_clients: default_max_clients(),
        }
    }

    pub fn display_addr(&self) -> String {
        display_addr(&self.host, self.port)
    }
}

/// Heartbeat settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl HeartbeatConfig {
    /// Enabled heartbeat with the given period.
    pub fn every(interval_ms: u64) -> Self {
        Self {
            enabled: true,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn display_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
