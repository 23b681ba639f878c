//! Bounded per-connection outbound queue and its drain worker.
//!
//! Producers (the hub, and a session for its own unicast frames) only ever
//! call [`MailboxSender::enqueue`], which never waits. The single consumer is
//! [`MailboxReceiver::drain`], spawned once per connection, which writes
//! frames to the transport in the order they were enqueued.

use crate::connection::{ConnectionId, Frame, FrameSender};
use crate::error::ServerError;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Creates the two ends of a connection's mailbox.
///
/// # Arguments
///
/// * `id` - The connection this mailbox belongs to, used in errors and logs
/// * `capacity` - Frames that may be queued before enqueue is rejected
pub fn mailbox(id: ConnectionId, capacity: usize) -> (MailboxSender, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MailboxSender { id, tx }, MailboxReceiver { id, rx })
}

/// Producer side of a mailbox. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
}

impl MailboxSender {
    /// Queues a frame without waiting.
    ///
    /// Fails with [`ServerError::MailboxFull`] when the queue is at capacity
    /// and with [`ServerError::Transport`] once the drain worker has stopped.
    pub fn enqueue(&self, frame: Frame) -> Result<(), ServerError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ServerError::MailboxFull(self.id),
            TrySendError::Closed(_) => {
                ServerError::Transport(format!("connection {} is no longer writable", self.id))
            }
        })
    }
}

/// How a drain worker finished.
#[derive(Debug)]
pub enum DrainOutcome {
    /// Every sender was dropped and all queued frames were written.
    Released,
    /// A write failed or timed out; remaining frames were discarded.
    WriteFailed(ServerError),
}

/// Consumer side of a mailbox.
#[derive(Debug)]
pub struct MailboxReceiver {
    id: ConnectionId,
    rx: mpsc::Receiver<Frame>,
}

impl MailboxReceiver {
    /// Writes queued frames to `writer` until the mailbox is released or a
    /// write fails, then closes the writer.
    ///
    /// Each write is bounded by `write_timeout`. After a failure the queue is
    /// closed, so later enqueues fail instead of piling up.
    pub async fn drain<W>(mut self, mut writer: W, write_timeout: Duration) -> DrainOutcome
    where
        W: FrameSender,
    {
        let outcome = loop {
            let Some(frame) = self.rx.recv().await else {
                break DrainOutcome::Released;
            };

            match tokio::time::timeout(write_timeout, writer.send(&frame)).await {
                Ok(Ok(())) => debug!("📤 Connection {} <- {}", self.id, frame),
                Ok(Err(e)) => break DrainOutcome::WriteFailed(e),
                Err(_) => {
                    break DrainOutcome::WriteFailed(ServerError::Transport(format!(
                        "write timed out after {write_timeout:?}"
                    )))
                }
            }
        };

        if let DrainOutcome::WriteFailed(e) = &outcome {
            warn!("⚠️ Dropping outbound queue for connection {}: {}", self.id, e);
        }

        self.rx.close();
        if tokio::time::timeout(write_timeout, writer.close()).await.is_err() {
            debug!("Close handshake for connection {} timed out", self.id);
        }

        outcome
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}
