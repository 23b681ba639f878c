//! Message type definitions for client-server communication.
//!
//! Every message is a JSON object whose `messageType` field names its kind.
//! Inbound kinds carry the sender's player (except exit); outbound kinds carry
//! either one player or the whole game state.

use crate::connection::{ConnectionId, Frame};
use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use waypoint_types::{GameState, Player};

pub const CLIENT_PLAYER_ENTER: &str = "CLIENT_MESSAGE_TYPE_PLAYER_ENTER";
pub const CLIENT_PLAYER_UPDATE: &str = "CLIENT_MESSAGE_TYPE_PLAYER_UPDATE";
pub const CLIENT_PLAYER_EXIT: &str = "CLIENT_MESSAGE_TYPE_PLAYER_EXIT";

pub const SERVER_GAME_STATE: &str = "SERVER_MESSAGE_TYPE_GAME_STATE";
pub const SERVER_PLAYER_ENTER: &str = "SERVER_MESSAGE_TYPE_PLAYER_ENTER";
pub const SERVER_PLAYER_UPDATE: &str = "SERVER_MESSAGE_TYPE_PLAYER_UPDATE";
pub const SERVER_PLAYER_EXIT: &str = "SERVER_MESSAGE_TYPE_PLAYER_EXIT";

/// The part of every inbound message the router looks at first.
///
/// Any other fields are ignored at this stage.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "messageType")]
    pub message_type: String,
}

/// Body of the inbound enter and update messages.
///
/// ```json
/// {
///   "messageType": "CLIENT_MESSAGE_TYPE_PLAYER_UPDATE",
///   "player": { "id": "a", "position": { "x": 5, "y": 5 } }
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct PlayerPayload {
    pub player: Player,
}

/// A decoded message sent from a client to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// The client introduces its player
    PlayerEnter(Player),

    /// The client reports its player's new state
    PlayerUpdate(Player),

    /// The client is leaving
    PlayerExit,
}

impl ClientMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::PlayerEnter(_) => CLIENT_PLAYER_ENTER,
            ClientMessage::PlayerUpdate(_) => CLIENT_PLAYER_UPDATE,
            ClientMessage::PlayerExit => CLIENT_PLAYER_EXIT,
        }
    }
}

/// A message sent from the server to one or more clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "messageType")]
pub enum ServerMessage {
    /// Full snapshot, sent once to a newly connected client
    #[serde(rename = "SERVER_MESSAGE_TYPE_GAME_STATE")]
    GameState {
        #[serde(rename = "gameState")]
        game_state: GameState,
    },

    #[serde(rename = "SERVER_MESSAGE_TYPE_PLAYER_ENTER")]
    PlayerEnter { player: Player },

    #[serde(rename = "SERVER_MESSAGE_TYPE_PLAYER_UPDATE")]
    PlayerUpdate { player: Player },

    #[serde(rename = "SERVER_MESSAGE_TYPE_PLAYER_EXIT")]
    PlayerExit { player: Player },
}

impl ServerMessage {
    pub fn game_state(connection_ids: &[ConnectionId], players: Vec<Player>) -> Self {
        ServerMessage::GameState {
            game_state: GameState::new(
                connection_ids.iter().map(ToString::to_string).collect(),
                players,
            ),
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::GameState { .. } => SERVER_GAME_STATE,
            ServerMessage::PlayerEnter { .. } => SERVER_PLAYER_ENTER,
            ServerMessage::PlayerUpdate { .. } => SERVER_PLAYER_UPDATE,
            ServerMessage::PlayerExit { .. } => SERVER_PLAYER_EXIT,
        }
    }

    /// Serializes the message once into a frame that can be shared by every
    /// recipient.
    pub fn encode(&self) -> Result<Frame, ServerError> {
        serde_json::to_string(self)
            .map(Frame::from)
            .map_err(|e| ServerError::Internal(format!("Failed to encode {}: {e}", self.message_type())))
    }
}
