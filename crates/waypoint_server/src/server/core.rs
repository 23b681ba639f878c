//! Core relay server implementation.
//!
//! This module contains the `RelayServer` struct: it binds the listener,
//! runs the hub task, accepts connections and hands each one to its own
//! session task, and coordinates shutdown.

use crate::{
    config::ServerConfig,
    connection::{Hub, HubWorker},
    error::ServerError,
    messaging::routed_message_types,
    server::{handlers::handle_connection, session::SessionSettings},
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::Mutex;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Listen backlog for the server socket.
const LISTEN_BACKLOG: i32 = 1024;

/// The relay server.
///
/// `RelayServer` owns the hub and the shutdown channel. Create it with
/// [`RelayServer::new`], then call [`RelayServer::start`] (or
/// [`RelayServer::bind`] and [`RelayServer::serve`] to learn the bound address
/// first). Another task may call [`RelayServer::shutdown`] at any time.
pub struct RelayServer {
    /// Server configuration settings
    config: ServerConfig,

    /// Handle to the connection hub
    hub: Hub,

    /// Pieces consumed by the first call to `serve`
    startup: Mutex<Option<Startup>>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

struct Startup {
    hub_worker: HubWorker,
    shutdown_receiver: broadcast::Receiver<()>,
}

impl RelayServer {
    /// Creates a new relay server with the specified configuration.
    ///
    /// Nothing is bound or spawned until the server is started.
    pub fn new(config: ServerConfig) -> Self {
        let (hub, hub_worker) = Hub::new(config.max_connections);
        // Subscribed up front so a shutdown requested before `serve` is not lost.
        let (shutdown_sender, shutdown_receiver) = broadcast::channel(1);

        Self {
            config,
            hub,
            startup: Mutex::new(Some(Startup {
                hub_worker,
                shutdown_receiver,
            })),
            shutdown_sender,
        }
    }

    /// Binds the configured address.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bind_address;
        let domain = if address.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        socket.set_reuse_address(true).ok();

        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;

        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener
            .set_nonblocking(true)
            .map_err(|e| ServerError::Network(format!("Failed to set non-blocking: {e}")))?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))?;

        info!("✅ Listener bound on {}", address);
        Ok(listener)
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting relay server on {}", self.config.bind_address);
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Serves connections from `listener` until shutdown is requested.
    ///
    /// # Shutdown Sequence
    ///
    /// 1. Stop accepting connections
    /// 2. Wait up to `shutdown_grace` for sessions to broadcast their exits
    /// 3. Abort the sessions still running
    /// 4. Stop the hub, releasing every mailbox
    ///
    /// # Returns
    ///
    /// `Ok(())` after a clean stop, or `ServerError::Internal` if the server
    /// was already started.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let Startup {
            hub_worker,
            mut shutdown_receiver,
        } = self
            .startup
            .lock()
            .map_err(|_| ServerError::Internal("Startup state poisoned".to_string()))?
            .take()
            .ok_or_else(|| ServerError::Internal("Server already started".to_string()))?;

        let hub_task = tokio::spawn(hub_worker.run());
        let settings = SessionSettings::from(&self.config);

        info!(
            "📬 Routing message types: {:?}",
            routed_message_types().collect::<Vec<_>>()
        );
        if let Ok(address) = listener.local_addr() {
            info!("🌐 Accepting WebSocket connections on {}", address);
        }

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let hub = self.hub.clone();
                        let shutdown = self.shutdown_sender.subscribe();

                        sessions.spawn(async move {
                            match handle_connection(stream, addr, hub, settings, shutdown).await {
                                Ok(end) => debug!("Session for {} ended: {:?}", addr, end),
                                Err(e) => error!("Connection error: {}", e),
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        // Server shutdown cleanup
        info!("🧹 Waiting for {} session(s) to close...", sessions.len());
        let drained = tokio::time::timeout(self.config.shutdown_grace(), async {
            while sessions.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Aborting {} session(s) still open after {:?}",
                sessions.len(),
                self.config.shutdown_grace()
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        if let Err(e) = self.hub.shutdown().await {
            debug!("Hub already stopped: {}", e);
        }
        if let Err(e) = hub_task.await {
            error!("Hub task failed: {}", e);
        }

        info!("Server stopped");
        Ok(())
    }

    /// Initiates server shutdown.
    ///
    /// Signals the accept loop and every session to stop. Returns
    /// immediately; `start`/`serve` returns once cleanup is complete.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down relay server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    /// Handle to the connection hub, for stats and tests.
    pub fn hub(&self) -> Hub {
        self.hub.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
