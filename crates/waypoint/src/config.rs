//! Configuration management for the Waypoint relay.
//!
//! This module handles loading, validation, and conversion of the relay
//! configuration from a TOML file and command-line overrides.

use crate::cli::CliArgs;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;
use waypoint_server::{InvalidMessagePolicy, ServerConfig};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn default_bind_address() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Relay server settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Network and per-connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "0.0.0.0:5000")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Outbound frames queued per connection before it is dropped as too slow
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Upper bound on a single outbound write, in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// `disconnect` or `ignore` clients that send undecodable frames
    #[serde(default)]
    pub invalid_message_policy: InvalidMessagePolicy,
    /// How long shutdown waits for sessions to close, in milliseconds
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_connections: default_max_connections(),
            mailbox_capacity: default_mailbox_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            invalid_message_policy: InvalidMessagePolicy::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing
    /// the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.server.max_connections == 0 {
            return Err("max_connections must be greater than zero".to_string());
        }
        if self.server.mailbox_capacity == 0 {
            return Err("mailbox_capacity must be greater than zero".to_string());
        }
        if self.server.write_timeout_ms == 0 {
            return Err("write_timeout_ms must be greater than zero".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Converts the application configuration to the relay's `ServerConfig`.
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let bind_address = self
            .server
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("Invalid bind address {}: {e}", self.server.bind_address))?;

        Ok(ServerConfig {
            bind_address,
            max_connections: self.server.max_connections,
            mailbox_capacity: self.server.mailbox_capacity,
            write_timeout_ms: self.server.write_timeout_ms,
            invalid_message_policy: self.server.invalid_message_policy,
            shutdown_grace_ms: self.server.shutdown_grace_ms,
        })
    }
}
