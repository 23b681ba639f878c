//! Convenience constructors for the relay server.

use crate::{config::ServerConfig, server::RelayServer};

/// Creates a relay server with the default configuration.
pub fn create_server() -> RelayServer {
    create_server_with_config(ServerConfig::default())
}

/// Creates a relay server with the specified configuration.
pub fn create_server_with_config(config: ServerConfig) -> RelayServer {
    RelayServer::new(config)
}
