//! Error types for the relay server.
//!
//! Every variant except `Network`, `HubClosed` and `Internal` describes a
//! failure scoped to a single connection. Those end that connection's session
//! and are never propagated to the hub or to other connections.

use crate::connection::ConnectionId;
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding, listening, accepting or upgrading a connection failed
    #[error("Network error: {0}")]
    Network(String),

    /// Reading from or writing to one connection failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// An inbound frame was not valid JSON or did not match its schema
    #[error("Decode error: {0}")]
    Decode(String),

    /// An inbound frame named a `messageType` with no registered route
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// A connection's outbound queue was full and the frame was rejected
    #[error("Mailbox full for connection {0}")]
    MailboxFull(ConnectionId),

    /// The hub no longer holds this connection, usually because a broadcast
    /// found its mailbox full
    #[error("Connection {0} was evicted")]
    Evicted(ConnectionId),

    /// Registration refused because the connection limit was reached
    #[error("Connection limit reached ({0})")]
    CapacityReached(usize),

    /// The hub task has stopped
    #[error("Hub is no longer running")]
    HubClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Errors caused by what a client sent, as opposed to the transport or
    /// the server itself. The invalid message policy applies only to these.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ServerError::Decode(_) | ServerError::UnknownMessageType(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_classification() {
        assert!(ServerError::Decode("bad".into()).is_invalid_input());
        assert!(ServerError::UnknownMessageType("NOPE".into()).is_invalid_input());

        assert!(!ServerError::Transport("reset".into()).is_invalid_input());
        assert!(!ServerError::MailboxFull(3).is_invalid_input());
        assert!(!ServerError::Evicted(3).is_invalid_input());
        assert!(!ServerError::HubClosed.is_invalid_input());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ServerError::UnknownMessageType("CLIENT_MESSAGE_TYPE_JUMP".into()).to_string(),
            "Unknown message type: CLIENT_MESSAGE_TYPE_JUMP"
        );
        assert_eq!(
            ServerError::MailboxFull(7).to_string(),
            "Mailbox full for connection 7"
        );
    }
}
