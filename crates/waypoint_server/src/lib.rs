//! # Waypoint Server - Real-Time Position Relay
//!
//! Keeps a set of connected clients' shared position state synchronized.
//! Each client reports its own player's identity and position; the server
//! fans every report out to all connected clients and hands newcomers a full
//! snapshot of the current state.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Hub** - A single task owning the registry of connections. Every
//!   registration, departure and broadcast is a command it applies in order.
//! * **Mailbox** - A bounded outbound queue per connection, drained by its own
//!   writer task, so one slow client never blocks the others.
//! * **Session** - One task per connection reading frames, routing them and
//!   applying enter/update/exit semantics.
//! * **Router** - A static table from `messageType` to typed decoders.
//!
//! ### Message Flow
//!
//! 1. A client connects over WebSocket and receives `GAME_STATE`
//! 2. The client sends `PLAYER_ENTER` / `PLAYER_UPDATE` frames
//! 3. The session records the player in the hub and asks it to broadcast
//! 4. The hub enqueues the encoded frame onto every mailbox
//! 5. When the client leaves, everyone receives `PLAYER_EXIT`
//!
//! ## Error Handling
//!
//! Failures are described by [`ServerError`]. Errors caused by one
//! connection end that connection's session and never reach the hub or any
//! other connection.

pub use config::{InvalidMessagePolicy, ServerConfig};
pub use connection::{ConnectionId, Frame, Hub, HubStats};
pub use error::ServerError;
pub use messaging::{ClientMessage, ServerMessage};
pub use server::{RelayServer, SessionEnd};
pub use utils::{create_server, create_server_with_config};

pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod server;
pub mod utils;
