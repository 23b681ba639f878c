//! Transport halves for one duplex, message-oriented connection.
//!
//! A session owns the [`FrameReceiver`] half and its mailbox drain worker owns
//! the [`FrameSender`] half, so reads and writes never contend for the same
//! object. WebSocket streams are the production transport; the channel
//! transport connects a session to an in-process peer.

use crate::connection::Frame;
use crate::error::ServerError;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

/// Read half of a connection.
#[async_trait]
pub trait FrameReceiver: Send {
    /// Waits for the next inbound frame.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, ServerError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSender: Send {
    async fn send(&mut self, frame: &Frame) -> Result<(), ServerError>;

    /// Closes the write side. Errors are ignored; the connection is going away.
    async fn close(&mut self);
}

// ============================================================================
// WebSocket
// ============================================================================

/// Type alias for WebSocket stream
pub type WsStream = WebSocketStream<TcpStream>;

/// Incoming half of an upgraded WebSocket connection.
pub struct WsReceiver {
    stream: SplitStream<WsStream>,
}

/// Outgoing half of an upgraded WebSocket connection.
pub struct WsSender {
    sink: SplitSink<WsStream, Message>,
}

/// Splits an upgraded WebSocket into its sending and receiving halves.
pub fn split_websocket(ws: WsStream) -> (WsSender, WsReceiver) {
    let (sink, stream) = ws.split();
    (WsSender { sink }, WsReceiver { stream })
}

#[async_trait]
impl FrameReceiver for WsReceiver {
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, ServerError> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                Ok(Message::Binary(data)) => return Ok(Some(data.to_vec())),
                Ok(Message::Close(_)) => return Ok(None),
                // Pings are answered by tungstenite on the next write or flush.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(e) => return Err(ServerError::Transport(e.to_string())),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl FrameSender for WsSender {
    async fn send(&mut self, frame: &Frame) -> Result<(), ServerError> {
        self.sink
            .send(Message::text(frame.as_str().to_owned()))
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

// ============================================================================
// In-process channel
// ============================================================================

/// Receiving half of a channel transport.
pub struct ChannelReceiver {
    inbound: mpsc::UnboundedReceiver<Result<Vec<u8>, String>>,
}

/// Sending half of a channel transport.
pub struct ChannelSender {
    outbound: Option<mpsc::UnboundedSender<Frame>>,
}

/// The far end of a channel transport, playing the part of a client.
pub struct ChannelPeer {
    to_server: Option<mpsc::UnboundedSender<Result<Vec<u8>, String>>>,
    from_server: mpsc::UnboundedReceiver<Frame>,
}

/// Creates a connected transport pair: the server halves and the client peer.
pub fn channel_transport() -> (ChannelSender, ChannelReceiver, ChannelPeer) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();

    (
        ChannelSender {
            outbound: Some(outbound),
        },
        ChannelReceiver { inbound },
        ChannelPeer {
            to_server: Some(to_server),
            from_server,
        },
    )
}

#[async_trait]
impl FrameReceiver for ChannelReceiver {
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, ServerError> {
        match self.inbound.recv().await {
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(reason)) => Err(ServerError::Transport(reason)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameSender for ChannelSender {
    async fn send(&mut self, frame: &Frame) -> Result<(), ServerError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| ServerError::Transport("connection closed".to_string()))?;
        outbound
            .send(frame.clone())
            .map_err(|_| ServerError::Transport("peer went away".to_string()))
    }

    async fn close(&mut self) {
        self.outbound = None;
    }
}

impl ChannelPeer {
    /// Sends one frame to the server. Returns `false` if the server half is gone.
    pub fn send_text(&self, text: &str) -> bool {
        match &self.to_server {
            Some(tx) => tx.send(Ok(text.as_bytes().to_vec())).is_ok(),
            None => false,
        }
    }

    /// Makes the server's next read fail as if the connection had reset.
    pub fn fail(&mut self, reason: &str) {
        if let Some(tx) = self.to_server.take() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// Closes the client-to-server direction cleanly.
    pub fn hang_up(&mut self) {
        self.to_server = None;
    }

    /// Waits for the next frame from the server. `None` once the server has
    /// closed its write side.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.from_server.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_carries_frames_both_ways() {
        let (mut sender, mut receiver, mut peer) = channel_transport();

        assert!(peer.send_text("hello"));
        assert_eq!(receiver.receive().await.unwrap(), Some(b"hello".to_vec()));

        sender.send(&Frame::from("world")).await.unwrap();
        assert_eq!(peer.next_frame().await.unwrap().as_str(), "world");
    }

    #[tokio::test]
    async fn test_channel_transport_close_and_failure() {
        let (mut sender, mut receiver, mut peer) = channel_transport();

        sender.close().await;
        assert!(peer.next_frame().await.is_none());
        assert!(sender.send(&Frame::from("late")).await.is_err());

        peer.fail("connection reset");
        let result = receiver.receive().await;
        assert!(matches!(result, Err(ServerError::Transport(reason)) if reason == "connection reset"));
        assert_eq!(receiver.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_channel_transport_hang_up_reads_as_eof() {
        let (_sender, mut receiver, mut peer) = channel_transport();

        peer.hang_up();
        assert_eq!(receiver.receive().await.unwrap(), None);
        assert!(!peer.send_text("after hang up"));
    }
}
