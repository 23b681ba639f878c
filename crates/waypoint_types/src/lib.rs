//! Shared entity types for the Waypoint relay.
//!
//! These are the values that travel over the wire and live in the hub
//! registry: a [`Player`] identified by a client-chosen string and its
//! current [`Position`]. They carry no behavior beyond construction and
//! validation; the relay never interprets positions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Position
// ============================================================================

/// A point on the shared 2D plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

// ============================================================================
// Player
// ============================================================================

/// A client's entity as last reported by that client.
///
/// The `id` is opaque to the server. Two clients may report the same id;
/// keeping ids unique is the clients' job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub position: Position,
}

impl Player {
    pub fn new(id: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }

    /// Checks the invariants a decoded player must hold before the relay
    /// stores or rebroadcasts it.
    pub fn validate(&self) -> Result<(), EntityError> {
        if !self.position.is_finite() {
            return Err(EntityError::NonFinitePosition {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Snapshot of every known player, as sent to a newly connected client.
///
/// `connection_ids` lists every connection the server holds when the
/// snapshot is taken, players or not, as decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    #[serde(rename = "connectionIds", default)]
    pub connection_ids: Vec<String>,
    pub players: Vec<Player>,
}

impl GameState {
    pub fn new(connection_ids: Vec<String>, players: Vec<Player>) -> Self {
        Self {
            connection_ids,
            players,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Entity validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntityError {
    #[error("Player {id} has a non-finite position")]
    NonFinitePosition { id: String },
}
