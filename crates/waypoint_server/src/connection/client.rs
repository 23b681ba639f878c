//! The hub's record of one registered connection.

use crate::connection::{ConnectionId, MailboxSender};
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::sync::oneshot;
use waypoint_types::Player;

/// Represents an individual client connection as the hub sees it.
///
/// The record starts without a player; the session fills it in on the first
/// enter or update and replaces it on every later update. Dropping the record
/// drops the hub's mailbox sender, which releases the drain worker, and fires
/// the removal signal handed out by [`ConnectionRecord::watch_removal`].
#[derive(Debug)]
pub struct ConnectionRecord {
    /// Process-unique connection identifier
    pub id: ConnectionId,

    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// When this connection was established
    pub connected_at: SystemTime,

    /// Copy of the session's current player (None until the first enter or update)
    pub player: Option<Player>,

    /// Where frames for this connection are queued
    pub mailbox: MailboxSender,

    removed: Option<oneshot::Sender<()>>,
}

impl ConnectionRecord {
    /// Creates a record for a freshly accepted connection with no player yet.
    pub fn new(id: ConnectionId, remote_addr: SocketAddr, mailbox: MailboxSender) -> Self {
        Self {
            id,
            remote_addr,
            connected_at: SystemTime::now(),
            player: None,
            mailbox,
            removed: None,
        }
    }

    /// Returns a receiver that completes once the hub drops this record,
    /// whether the session deregistered it or a broadcast evicted it.
    ///
    /// Only the most recent receiver is notified.
    pub fn watch_removal(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.removed = Some(tx);
        rx
    }
}

impl Drop for ConnectionRecord {
    fn drop(&mut self) {
        if let Some(removed) = self.removed.take() {
            let _ = removed.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mailbox;

    #[tokio::test]
    async fn test_dropping_record_fires_removal_signal() {
        let (tx, _rx) = mailbox(1, 4);
        let mut record = ConnectionRecord::new(1, "127.0.0.1:1".parse().unwrap(), tx);
        let mut removed = record.watch_removal();

        assert!(removed.try_recv().is_err());
        drop(record);
        assert!(removed.await.is_ok());
    }
}
