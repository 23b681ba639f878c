//! Message handling and routing for client-server communication.
//!
//! This module defines the JSON wire messages in both directions and the
//! routing table that turns an inbound frame into a typed [`ClientMessage`].

pub mod router;
pub mod types;

pub use router::{route_client_message, routed_message_types};
pub use types::{ClientMessage, ServerMessage};
