//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize the relay. The binary builds one of these from its TOML
//! file and command-line flags.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// What a session does when a client sends a frame it cannot decode or whose
/// `messageType` has no route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidMessagePolicy {
    /// Close the offending connection.
    #[default]
    Disconnect,
    /// Log the frame and keep reading.
    Ignore,
}

/// Configuration structure for the relay server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrently registered connections
    pub max_connections: usize,

    /// Outbound frames that may wait for one connection before it is evicted
    pub mailbox_capacity: usize,

    /// Upper bound for a single outbound write, in milliseconds
    pub write_timeout_ms: u64,

    /// Handling of undecodable or unroutable inbound frames
    pub invalid_message_policy: InvalidMessagePolicy,

    /// How long shutdown waits for sessions to say goodbye, in milliseconds
    pub shutdown_grace_ms: u64,
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 5000)),
            max_connections: 1000,
            mailbox_capacity: 256,
            write_timeout_ms: 5000,
            invalid_message_policy: InvalidMessagePolicy::Disconnect,
            shutdown_grace_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:5000");
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.mailbox_capacity, 256);
        assert_eq!(config.write_timeout(), Duration::from_secs(5));
        assert_eq!(config.invalid_message_policy, InvalidMessagePolicy::Disconnect);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_message_policy_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: InvalidMessagePolicy,
        }

        let parsed: Wrapper = serde_json::from_str(r#"{"policy":"ignore"}"#).unwrap();
        assert_eq!(parsed.policy, InvalidMessagePolicy::Ignore);

        let parsed: Wrapper = serde_json::from_str(r#"{"policy":"disconnect"}"#).unwrap();
        assert_eq!(parsed.policy, InvalidMessagePolicy::Disconnect);

        assert!(serde_json::from_str::<Wrapper>(r#"{"policy":"panic"}"#).is_err());
    }
}
