//! Connection management for client connections.
//!
//! This module holds everything with a per-connection lifetime: the transport
//! halves a session reads from and a drain worker writes to, the bounded
//! outbound mailbox between them, the registry record the hub keeps, and the
//! hub itself.

pub mod client;
pub mod hub;
pub mod mailbox;
pub mod transport;

pub use client::ConnectionRecord;
pub use hub::{Hub, HubStats, HubWorker};
pub use mailbox::{mailbox, DrainOutcome, MailboxReceiver, MailboxSender};
pub use transport::{FrameReceiver, FrameSender};

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Type alias for connection identifiers.
///
/// Connection IDs are used to uniquely identify client connections
/// throughout their lifecycle on the server.
pub type ConnectionId = usize;

static NEXT_CONNECTION_ID: AtomicUsize = AtomicUsize::new(1);

/// Allocates a process-unique connection id.
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// One encoded, immutable server message.
///
/// Cloning shares the underlying buffer, so a broadcast hands the same bytes
/// to every mailbox.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Arc<str>);

impl Frame {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self(Arc::from(text))
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self(Arc::from(text))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame").field(&self.as_str()).finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let ids: Vec<ConnectionId> = (0..100).map(|_| next_connection_id()).collect();
        let mut deduped = ids.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
    }

    #[test]
    fn test_frame_clones_share_buffer() {
        let frame = Frame::from(r#"{"messageType":"X"}"#.to_string());
        let copy = frame.clone();

        assert_eq!(frame, copy);
        assert!(std::ptr::eq(frame.as_str(), copy.as_str()));
        assert_eq!(copy.len(), 19);
    }
}
