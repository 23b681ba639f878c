//! Per-connection session handling.
//!
//! A session owns the read half of one connection. It spawns the mailbox
//! drain worker for the write half, registers with the hub, then applies
//! inbound messages one at a time until the client leaves, the transport
//! fails, or the server shuts down. Whatever ends it, the session departs
//! from the hub exactly once.

use crate::config::{InvalidMessagePolicy, ServerConfig};
use crate::connection::{
    mailbox, ConnectionId, ConnectionRecord, DrainOutcome, Frame, FrameReceiver, FrameSender,
    Hub,
};
use crate::error::ServerError;
use crate::messaging::{route_client_message, ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use waypoint_types::Player;

/// The subset of [`ServerConfig`] a session needs.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub mailbox_capacity: usize,
    pub write_timeout: Duration,
    pub invalid_message_policy: InvalidMessagePolicy,
}

impl From<&ServerConfig> for SessionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            mailbox_capacity: config.mailbox_capacity,
            write_timeout: config.write_timeout(),
            invalid_message_policy: config.invalid_message_policy,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, no player reported yet
    Connected,
    /// The client has entered or updated at least once
    Active,
    /// Departed from the hub
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `PLAYER_EXIT`
    ClientExit,
    /// The client closed the connection
    PeerClosed,
    /// Reading from the connection failed
    TransportError,
    /// The client sent a frame that could not be routed
    InvalidMessage,
    /// The drain worker stopped after a failed write
    WriterClosed,
    /// The hub dropped this connection, after a full mailbox or because it
    /// stopped
    Evicted,
    /// The server is shutting down
    Shutdown,
    /// The hub refused the registration
    Refused,
    /// The hub stopped while the session was running
    HubClosed,
}

/// One client's session.
pub struct Session {
    id: ConnectionId,
    remote_addr: SocketAddr,
    hub: Hub,
    settings: SessionSettings,
    state: SessionState,
    player: Option<Player>,
}

impl Session {
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        hub: Hub,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id,
            remote_addr,
            hub,
            settings,
            state: SessionState::Connected,
            player: None,
        }
    }

    /// Runs the session to completion.
    ///
    /// # Arguments
    ///
    /// * `reader` - Read half of the connection, owned by this task
    /// * `writer` - Write half, handed to the drain worker
    /// * `shutdown` - Server-wide shutdown signal
    ///
    /// # Returns
    ///
    /// The reason the session ended. By the time this returns the session
    /// has departed from the hub and its drain worker has finished.
    pub async fn run<R, W>(
        mut self,
        mut reader: R,
        writer: W,
        mut shutdown: broadcast::Receiver<()>,
    ) -> SessionEnd
    where
        R: FrameReceiver,
        W: FrameSender + 'static,
    {
        let (mailbox_tx, mailbox_rx) = mailbox(self.id, self.settings.mailbox_capacity);
        let mut drain = tokio::spawn(mailbox_rx.drain(writer, self.settings.write_timeout));

        let mut record = ConnectionRecord::new(self.id, self.remote_addr, mailbox_tx);
        let mut removed = record.watch_removal();
        match self.hub.register(record).await {
            Ok(players) => debug!(
                "Connection {} sent game state with {} players",
                self.id,
                players.len()
            ),
            Err(e) => {
                warn!("🚫 Refusing connection {} from {}: {}", self.id, self.remote_addr, e);
                // The rejected record took the only sender, so the worker just closes.
                let _ = drain.await;
                return SessionEnd::Refused;
            }
        }

        let mut drain_finished = false;
        let end = loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => break SessionEnd::Shutdown,

                _ = &mut removed => {
                    debug!("Connection {} was evicted by the hub", self.id);
                    break SessionEnd::Evicted;
                }

                outcome = &mut drain => {
                    drain_finished = true;
                    match outcome {
                        Ok(DrainOutcome::WriteFailed(e)) => {
                            debug!("Connection {} writer failed: {}", self.id, e)
                        }
                        Ok(DrainOutcome::Released) => {
                            debug!("Connection {} mailbox released", self.id)
                        }
                        Err(e) => warn!("Connection {} writer task failed: {}", self.id, e),
                    }
                    break SessionEnd::WriterClosed;
                }

                received = reader.receive() => match received {
                    Ok(Some(bytes)) => {
                        if let Some(end) = self.handle_frame(&bytes).await {
                            break end;
                        }
                    }
                    Ok(None) => break SessionEnd::PeerClosed,
                    Err(e) => {
                        debug!("Connection {} read failed: {}", self.id, e);
                        break SessionEnd::TransportError;
                    }
                },
            }
        };

        let id = self.id;
        self.close(end).await;

        // Departure dropped the hub's sender, so the worker flushes and stops.
        if !drain_finished {
            let _ = drain.await;
        }

        info!("👋 Connection {} session ended: {:?}", id, end);
        end
    }

    /// Applies one inbound frame. Returns `Some` when the session must end.
    async fn handle_frame(&mut self, bytes: &[u8]) -> Option<SessionEnd> {
        debug!(
            "📨 Connection {} -> {}",
            self.id,
            String::from_utf8_lossy(bytes)
        );

        let result = match route_client_message(bytes) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(end) => end,
            Err(e) if e.is_invalid_input() => self.reject(e),
            Err(ServerError::Evicted(_)) => Some(SessionEnd::Evicted),
            Err(ServerError::HubClosed) => Some(SessionEnd::HubClosed),
            Err(e) => {
                warn!("Connection {} failed to handle message: {}", self.id, e);
                None
            }
        }
    }

    fn reject(&self, error: ServerError) -> Option<SessionEnd> {
        match self.settings.invalid_message_policy {
            InvalidMessagePolicy::Disconnect => {
                warn!("⚠️ Closing connection {}: {}", self.id, error);
                Some(SessionEnd::InvalidMessage)
            }
            InvalidMessagePolicy::Ignore => {
                warn!("⚠️ Ignoring frame from connection {}: {}", self.id, error);
                None
            }
        }
    }

    async fn handle_message(
        &mut self,
        message: ClientMessage,
    ) -> Result<Option<SessionEnd>, ServerError> {
        match message {
            ClientMessage::PlayerEnter(player) => {
                let frame = ServerMessage::PlayerEnter {
                    player: player.clone(),
                }
                .encode()?;
                self.announce(player, frame).await?;
                Ok(None)
            }
            ClientMessage::PlayerUpdate(player) => {
                if self.state == SessionState::Connected {
                    debug!("Connection {} updated before entering", self.id);
                }
                let frame = ServerMessage::PlayerUpdate {
                    player: player.clone(),
                }
                .encode()?;
                self.announce(player, frame).await?;
                Ok(None)
            }
            ClientMessage::PlayerExit => Ok(Some(SessionEnd::ClientExit)),
        }
    }

    async fn announce(&mut self, player: Player, frame: Frame) -> Result<(), ServerError> {
        self.player = Some(player.clone());
        self.state = SessionState::Active;
        self.hub.publish(self.id, player, frame).await
    }

    /// Broadcasts the exit (if a player was ever set) and leaves the hub.
    async fn close(mut self, end: SessionEnd) {
        self.state = SessionState::Closed;

        let farewell = match self.player.take() {
            Some(player) => match (ServerMessage::PlayerExit { player }).encode() {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!("Connection {} exit not announced: {}", self.id, e);
                    None
                }
            },
            None => {
                debug!(
                    "Connection {} left without a player, no exit broadcast",
                    self.id
                );
                None
            }
        };

        if let Err(e) = self.hub.depart(self.id, farewell).await {
            debug!(
                "Connection {} could not depart after {:?}: {}",
                self.id, end, e
            );
        }
    }
}
