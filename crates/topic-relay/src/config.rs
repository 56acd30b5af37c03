// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use thiserror::Error;

/// Lowest port the relay accepts (registered/dynamic range).
pub const MIN_PORT: u16 = 1024;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address both sockets bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Port shared by the UDP ingest socket and the TCP listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// Disable Nagle's algorithm on consumer connections
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    /// TCP listen backlog
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: i32,

    /// Frames a consumer may have queued before it is dropped as stalled
    #[serde(default = "default_max_pending_frames")]
    pub max_pending_frames: usize,

    /// Readiness events handled per poll
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    12345
}

fn default_true() -> bool {
    true
}

fn default_listen_backlog() -> i32 {
    128
}

fn default_max_pending_frames() -> usize {
    64
}

fn default_max_events() -> usize {
    128
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            tcp_nodelay: true,
            listen_backlog: default_listen_backlog(),
            max_pending_frames: default_max_pending_frames(),
            max_events: default_max_events(),
        }
    }
}

impl RelayConfig {
    /// Config bound to `port` on all interfaces.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Socket address for both endpoints.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port < MIN_PORT {
            return Err(ConfigError::Invalid(format!(
                "port {} outside {}-65535",
                self.port, MIN_PORT
            )));
        }
        if self.listen_backlog <= 0 {
            return Err(ConfigError::Invalid(
                "listen_backlog must be positive".into(),
            ));
        }
        if self.max_pending_frames == 0 {
            return Err(ConfigError::Invalid(
                "max_pending_frames cannot be 0".into(),
            ));
        }
        if self.max_events == 0 {
            return Err(ConfigError::Invalid("max_events cannot be 0".into()));
        }
        Ok(())
    }
}
