//! Message routing for inbound client frames.
//!
//! Routing happens in three steps: read the `messageType` discriminator, look
//! it up in a static table, and hand the whole frame to the typed decoder the
//! table names. A discriminator without an entry is an error, never a silent
//! drop.

use crate::error::ServerError;
use crate::messaging::types::{
    ClientMessage, Envelope, PlayerPayload, CLIENT_PLAYER_ENTER, CLIENT_PLAYER_EXIT,
    CLIENT_PLAYER_UPDATE,
};
use waypoint_types::Player;

type Decoder = fn(&[u8]) -> Result<ClientMessage, ServerError>;

static ROUTES: &[(&str, Decoder)] = &[
    (CLIENT_PLAYER_ENTER, decode_player_enter as Decoder),
    (CLIENT_PLAYER_UPDATE, decode_player_update as Decoder),
    (CLIENT_PLAYER_EXIT, decode_player_exit as Decoder),
];

/// Decodes one inbound frame into a [`ClientMessage`].
///
/// # Arguments
///
/// * `bytes` - The raw frame body (JSON, from a text or binary frame)
///
/// # Returns
///
/// The typed message, [`ServerError::Decode`] if the frame is not a JSON
/// object with a string `messageType` or its payload does not match the
/// schema, or [`ServerError::UnknownMessageType`] if no route exists.
///
/// # Example Message Format
///
/// ```json
/// {
///   "messageType": "CLIENT_MESSAGE_TYPE_PLAYER_ENTER",
///   "player": { "id": "a", "position": { "x": 1, "y": 2 } }
/// }
/// ```
pub fn route_client_message(bytes: &[u8]) -> Result<ClientMessage, ServerError> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| ServerError::Decode(format!("Invalid envelope: {e}")))?;

    let decoder = ROUTES
        .iter()
        .find(|(message_type, _)| *message_type == envelope.message_type)
        .map(|(_, decoder)| *decoder)
        .ok_or(ServerError::UnknownMessageType(envelope.message_type))?;

    decoder(bytes)
}

/// The discriminators that have a route, in table order.
pub fn routed_message_types() -> impl Iterator<Item = &'static str> {
    ROUTES.iter().map(|(message_type, _)| *message_type)
}

fn decode_player_enter(bytes: &[u8]) -> Result<ClientMessage, ServerError> {
    decode_player(bytes).map(ClientMessage::PlayerEnter)
}

fn decode_player_update(bytes: &[u8]) -> Result<ClientMessage, ServerError> {
    decode_player(bytes).map(ClientMessage::PlayerUpdate)
}

fn decode_player_exit(_bytes: &[u8]) -> Result<ClientMessage, ServerError> {
    Ok(ClientMessage::PlayerExit)
}

fn decode_player(bytes: &[u8]) -> Result<Player, ServerError> {
    let payload: PlayerPayload = serde_json::from_slice(bytes)
        .map_err(|e| ServerError::Decode(format!("Invalid player payload: {e}")))?;

    payload
        .player
        .validate()
        .map_err(|e| ServerError::Decode(e.to_string()))?;

    Ok(payload.player)
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_types::Position;

    #[test]
    fn test_routes_player_enter() {
        let frame = br#"{"messageType":"CLIENT_MESSAGE_TYPE_PLAYER_ENTER","player":{"id":"a","position":{"x":1,"y":2}}}"#;

        let message = route_client_message(frame).unwrap();
        assert_eq!(
            message,
            ClientMessage::PlayerEnter(Player::new("a", Position::new(1.0, 2.0)))
        );
    }

    #[test]
    fn test_routes_player_update_ignoring_extra_fields() {
        let frame = br#"{"messageType":"CLIENT_MESSAGE_TYPE_PLAYER_UPDATE","seq":9,"player":{"id":"a","position":{"x":5,"y":5},"color":"red"}}"#;

        let message = route_client_message(frame).unwrap();
        assert_eq!(
            message,
            ClientMessage::PlayerUpdate(Player::new("a", Position::new(5.0, 5.0)))
        );
    }

    #[test]
    fn test_routes_player_exit_without_payload() {
        let frame = br#"{"messageType":"CLIENT_MESSAGE_TYPE_PLAYER_EXIT"}"#;
        assert_eq!(route_client_message(frame).unwrap(), ClientMessage::PlayerExit);
    }

    #[test]
    fn test_unknown_message_type() {
        let frame = br#"{"messageType":"CLIENT_MESSAGE_TYPE_JUMP"}"#;

        match route_client_message(frame) {
            Err(ServerError::UnknownMessageType(name)) => {
                assert_eq!(name, "CLIENT_MESSAGE_TYPE_JUMP")
            }
            other => panic!("expected unknown message type, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frames_are_decode_errors() {
        let frames: [&[u8]; 6] = [
            b"not json",
            b"[]",
            br#"{"player":{"id":"a","position":{"x":1,"y":2}}}"#,
            br#"{"messageType":7}"#,
            br#"{"messageType":"CLIENT_MESSAGE_TYPE_PLAYER_ENTER"}"#,
            br#"{"messageType":"CLIENT_MESSAGE_TYPE_PLAYER_UPDATE","player":{"id":"a","position":{"x":"far","y":2}}}"#,
        ];

        for frame in frames {
            let result = route_client_message(frame);
            assert!(
                matches!(result, Err(ServerError::Decode(_))),
                "{:?} should not decode",
                String::from_utf8_lossy(frame)
            );
        }
    }

    #[test]
    fn test_route_table_lists_all_client_types() {
        let types: Vec<&str> = routed_message_types().collect();
        assert_eq!(
            types,
            vec![CLIENT_PLAYER_ENTER, CLIENT_PLAYER_UPDATE, CLIENT_PLAYER_EXIT]
        );
    }
}
