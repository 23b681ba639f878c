//! The connection hub: the single authority over who is connected.
//!
//! A [`HubWorker`] task owns the [`Registry`] outright. Every other task talks
//! to it through a cloneable [`Hub`] handle that turns each operation into a
//! command on one channel, so registrations, departures, player records and
//! broadcasts are applied one at a time in arrival order. A broadcast is
//! therefore atomic with respect to membership changes.
//!
//! The hub never writes to a network connection. It only enqueues onto
//! per-connection mailboxes, and a mailbox that cannot take a frame gets its
//! connection evicted on the spot.

use crate::connection::{ConnectionId, ConnectionRecord, Frame};
use crate::error::ServerError;
use crate::messaging::ServerMessage;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use waypoint_types::Player;

/// Commands that may wait in the hub's queue before it applies back-pressure.
const HUB_COMMAND_CAPACITY: usize = 1024;

/// Counts reported by [`Hub::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Registered connections
    pub connections: usize,
    /// Registered connections that have reported a player
    pub players: usize,
}

// ============================================================================
// Registry
// ============================================================================

/// The set of registered connections and the rules for changing it.
///
/// Only the hub task holds one of these.
#[derive(Debug)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    max_connections: usize,
}

impl Registry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Adds a connection and queues the current game state for it.
    ///
    /// The snapshot is taken and enqueued in the same step as the insert, so
    /// the newcomer's first frame is always `GAME_STATE` and every broadcast
    /// after it reaches the newcomer.
    ///
    /// # Returns
    ///
    /// The players in the snapshot, or [`ServerError::CapacityReached`] when
    /// the registry is full.
    pub fn register(&mut self, record: ConnectionRecord) -> Result<Vec<Player>, ServerError> {
        if self.connections.contains_key(&record.id) {
            return Err(ServerError::Internal(format!(
                "Connection {} is already registered",
                record.id
            )));
        }
        if self.connections.len() >= self.max_connections {
            return Err(ServerError::CapacityReached(self.max_connections));
        }

        let mut connection_ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        connection_ids.push(record.id);
        connection_ids.sort_unstable();

        let players = self.snapshot();
        let frame = ServerMessage::game_state(&connection_ids, players.clone()).encode()?;
        record.mailbox.enqueue(frame)?;

        info!(
            "🔗 Connection {} registered from {} ({} known players)",
            record.id,
            record.remote_addr,
            players.len()
        );
        self.connections.insert(record.id, record);
        Ok(players)
    }

    /// Removes a connection, releasing its mailbox. Unknown ids are ignored.
    ///
    /// Returns the player the record last held.
    pub fn deregister(&mut self, id: ConnectionId) -> Option<Player> {
        let mut record = self.connections.remove(&id)?;
        info!("🔌 Connection {} deregistered", id);
        record.player.take()
    }

    /// Stores a copy of a session's player. Unknown ids are ignored.
    pub fn record_player(&mut self, id: ConnectionId, player: Player) {
        if let Some(record) = self.connections.get_mut(&id) {
            record.player = Some(player);
        }
    }

    /// Enqueues `frame` onto every registered mailbox.
    ///
    /// Connections whose mailbox rejects the frame are evicted before this
    /// returns; their ids are returned.
    pub fn broadcast(&mut self, frame: &Frame) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();

        for (id, record) in &self.connections {
            if let Err(e) = record.mailbox.enqueue(frame.clone()) {
                warn!("⚠️ Evicting connection {}: {}", id, e);
                evicted.push(*id);
            }
        }

        for id in &evicted {
            self.connections.remove(id);
        }

        debug!(
            "📡 Broadcast to {} connections ({} evicted)",
            self.connections.len(),
            evicted.len()
        );
        evicted
    }

    /// Records a player and broadcasts the frame announcing it, as one step.
    ///
    /// Fails with [`ServerError::Evicted`] without broadcasting when `id` is
    /// not registered, and after broadcasting when this very broadcast evicted
    /// `id`. Either way the caller must depart.
    pub fn publish(
        &mut self,
        id: ConnectionId,
        player: Player,
        frame: &Frame,
    ) -> Result<(), ServerError> {
        if !self.contains(id) {
            debug!("Connection {} is not registered, publish refused", id);
            return Err(ServerError::Evicted(id));
        }

        self.record_player(id, player);
        if self.broadcast(frame).contains(&id) {
            return Err(ServerError::Evicted(id));
        }
        Ok(())
    }

    /// Broadcasts an optional farewell, then removes the connection.
    ///
    /// The farewell goes out even when the connection was already evicted.
    pub fn depart(&mut self, id: ConnectionId, farewell: Option<&Frame>) -> Option<Player> {
        if let Some(frame) = farewell {
            self.broadcast(frame);
        }
        self.deregister(id)
    }

    /// Players of all connections that have one, in connection order.
    pub fn snapshot(&self) -> Vec<Player> {
        let mut records: Vec<&ConnectionRecord> = self.connections.values().collect();
        records.sort_by_key(|record| record.id);
        records
            .into_iter()
            .filter_map(|record| record.player.clone())
            .collect()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            players: self
                .connections
                .values()
                .filter(|record| record.player.is_some())
                .count(),
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Drops every record, releasing all mailboxes.
    pub fn clear(&mut self) {
        self.connections.clear();
    }
}

// ============================================================================
// Hub task
// ============================================================================

enum HubCommand {
    Register {
        record: ConnectionRecord,
        reply: oneshot::Sender<Result<Vec<Player>, ServerError>>,
    },
    Deregister {
        id: ConnectionId,
        reply: oneshot::Sender<Option<Player>>,
    },
    RecordPlayer {
        id: ConnectionId,
        player: Player,
    },
    Broadcast {
        frame: Frame,
    },
    Publish {
        id: ConnectionId,
        player: Player,
        frame: Frame,
        reply: oneshot::Sender<Result<(), ServerError>>,
    },
    Depart {
        id: ConnectionId,
        farewell: Option<Frame>,
        reply: oneshot::Sender<Option<Player>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Player>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown,
}

/// Handle for talking to the hub task. Cheap to clone.
///
/// Every method fails with [`ServerError::HubClosed`] once the hub task has
/// stopped.
#[derive(Debug, Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

/// The hub task itself. Obtain one from [`Hub::new`] and spawn [`HubWorker::run`].
pub struct HubWorker {
    commands: mpsc::Receiver<HubCommand>,
    registry: Registry,
}

impl Hub {
    /// Creates a hub handle and the worker that serves it.
    ///
    /// # Arguments
    ///
    /// * `max_connections` - Registrations beyond this count are refused
    pub fn new(max_connections: usize) -> (Hub, HubWorker) {
        let (tx, rx) = mpsc::channel(HUB_COMMAND_CAPACITY);
        (
            Hub { commands: tx },
            HubWorker {
                commands: rx,
                registry: Registry::new(max_connections),
            },
        )
    }

    async fn send(&self, command: HubCommand) -> Result<(), ServerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ServerError::HubClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, ServerError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply)).await?;
        response.await.map_err(|_| ServerError::HubClosed)
    }

    /// Registers a connection. Its mailbox receives `GAME_STATE` before any
    /// broadcast; the returned players are that snapshot.
    pub async fn register(&self, record: ConnectionRecord) -> Result<Vec<Player>, ServerError> {
        self.request(|reply| HubCommand::Register { record, reply })
            .await?
    }

    /// Removes a connection. Idempotent.
    pub async fn deregister(&self, id: ConnectionId) -> Result<Option<Player>, ServerError> {
        self.request(|reply| HubCommand::Deregister { id, reply })
            .await
    }

    pub async fn record_player(&self, id: ConnectionId, player: Player) -> Result<(), ServerError> {
        self.send(HubCommand::RecordPlayer { id, player }).await
    }

    /// Enqueues `frame` onto every registered mailbox.
    pub async fn broadcast(&self, frame: Frame) -> Result<(), ServerError> {
        self.send(HubCommand::Broadcast { frame }).await
    }

    /// Records `player` for `id` and broadcasts `frame`, atomically.
    ///
    /// Fails with [`ServerError::Evicted`] once the hub no longer holds `id`.
    pub async fn publish(
        &self,
        id: ConnectionId,
        player: Player,
        frame: Frame,
    ) -> Result<(), ServerError> {
        self.request(|reply| HubCommand::Publish {
            id,
            player,
            frame,
            reply,
        })
        .await?
    }

    /// Broadcasts `farewell` (if any) and removes `id`, atomically.
    pub async fn depart(
        &self,
        id: ConnectionId,
        farewell: Option<Frame>,
    ) -> Result<Option<Player>, ServerError> {
        self.request(|reply| HubCommand::Depart { id, farewell, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<Vec<Player>, ServerError> {
        self.request(|reply| HubCommand::Snapshot { reply }).await
    }

    pub async fn stats(&self) -> Result<HubStats, ServerError> {
        self.request(|reply| HubCommand::Stats { reply }).await
    }

    /// Stops the hub task. Commands queued behind this one are discarded.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        self.send(HubCommand::Shutdown).await
    }
}

impl HubWorker {
    /// Applies commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!("🧭 Hub started");

        while let Some(command) = self.commands.recv().await {
            if !self.apply(command) {
                break;
            }
        }

        let stats = self.registry.stats();
        self.registry.clear();
        info!(
            "🧭 Hub stopped, released {} connections",
            stats.connections
        );
    }

    /// Returns `false` when the hub should stop.
    fn apply(&mut self, command: HubCommand) -> bool {
        match command {
            HubCommand::Register { record, reply } => {
                let _ = reply.send(self.registry.register(record));
            }
            HubCommand::Deregister { id, reply } => {
                let _ = reply.send(self.registry.deregister(id));
            }
            HubCommand::RecordPlayer { id, player } => {
                self.registry.record_player(id, player);
            }
            HubCommand::Broadcast { frame } => {
                self.registry.broadcast(&frame);
            }
            HubCommand::Publish {
                id,
                player,
                frame,
                reply,
            } => {
                let _ = reply.send(self.registry.publish(id, player, &frame));
            }
            HubCommand::Depart { id, farewell, reply } => {
                let _ = reply.send(self.registry.depart(id, farewell.as_ref()));
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.registry.stats());
            }
            HubCommand::Shutdown => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{mailbox, MailboxReceiver};
    use crate::messaging::types::SERVER_GAME_STATE;
    use std::net::SocketAddr;
    use waypoint_types::Position;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn record(id: ConnectionId, capacity: usize) -> (ConnectionRecord, MailboxReceiver) {
        let (tx, rx) = mailbox(id, capacity);
        (ConnectionRecord::new(id, addr(), tx), rx)
    }

    fn drain_now(rx: &mut MailboxReceiver) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.try_recv() {
            frames.push(frame.as_str().to_string());
        }
        frames
    }

    fn spawn_hub(max_connections: usize) -> Hub {
        let (hub, worker) = Hub::new(max_connections);
        tokio::spawn(worker.run());
        hub
    }

    #[test]
    fn test_register_enqueues_game_state_first() {
        let mut registry = Registry::new(10);
        let (first, _first_rx) = record(1, 8);
        registry.register(first).unwrap();
        registry.record_player(1, Player::new("a", Position::new(1.0, 2.0)));

        let (second, mut second_rx) = record(2, 8);
        let players = registry.register(second).unwrap();

        assert_eq!(players, vec![Player::new("a", Position::new(1.0, 2.0))]);
        let frames = drain_now(&mut second_rx);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains(SERVER_GAME_STATE));
        assert!(frames[0].contains(r#""id":"a""#));
    }

    #[test]
    fn test_game_state_lists_connection_ids_including_newcomer() {
        let mut registry = Registry::new(10);
        for id in [4, 2] {
            let (r, _rx) = record(id, 8);
            registry.register(r).unwrap();
        }

        let (newcomer, mut newcomer_rx) = record(9, 8);
        registry.register(newcomer).unwrap();

        let frames = drain_now(&mut newcomer_rx);
        assert!(frames[0].contains(r#""connectionIds":["2","4","9"]"#));
    }

    #[test]
    fn test_publish_refuses_unregistered_connection() {
        let mut registry = Registry::new(10);
        let (other, mut other_rx) = record(2, 8);
        registry.register(other).unwrap();
        drain_now(&mut other_rx);

        let result = registry.publish(
            1,
            Player::new("ghost", Position::new(9.0, 9.0)),
            &Frame::from("update"),
        );

        assert!(matches!(result, Err(ServerError::Evicted(1))));
        assert!(drain_now(&mut other_rx).is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_publish_reports_eviction_of_publisher() {
        let mut registry = Registry::new(10);
        // GAME_STATE fills the publisher's only slot.
        let (publisher, _publisher_rx) = record(1, 1);
        let (other, mut other_rx) = record(2, 8);
        registry.register(publisher).unwrap();
        registry.register(other).unwrap();
        drain_now(&mut other_rx);

        let result = registry.publish(
            1,
            Player::new("a", Position::default()),
            &Frame::from("enter"),
        );

        assert!(matches!(result, Err(ServerError::Evicted(1))));
        assert!(!registry.contains(1));
        assert_eq!(drain_now(&mut other_rx), vec!["enter".to_string()]);
    }

    #[test]
    fn test_eviction_fires_removal_signal() {
        let mut registry = Registry::new(10);
        let (tx, _rx) = mailbox(1, 1);
        let mut slow = ConnectionRecord::new(1, addr(), tx);
        let mut removed = slow.watch_removal();
        registry.register(slow).unwrap();

        assert!(removed.try_recv().is_err());
        registry.broadcast(&Frame::from("overflow"));
        assert!(removed.try_recv().is_ok());
    }

    #[test]
    fn test_register_refused_at_capacity() {
        let mut registry = Registry::new(1);
        let (first, _rx1) = record(1, 8);
        let (second, _rx2) = record(2, 8);

        registry.register(first).unwrap();
        let result = registry.register(second);

        assert!(matches!(result, Err(ServerError::CapacityReached(1))));
        assert!(!registry.contains(2));
    }

    #[test]
    fn test_deregister_unknown_is_noop() {
        let mut registry = Registry::new(10);
        let (first, _rx) = record(1, 8);
        registry.register(first).unwrap();

        assert_eq!(registry.deregister(99), None);
        assert_eq!(registry.stats().connections, 1);
        assert_eq!(registry.deregister(1), None);
        assert_eq!(registry.deregister(1), None);
        assert_eq!(registry.stats(), HubStats::default());
    }

    #[test]
    fn test_record_player_for_unknown_id_is_ignored() {
        let mut registry = Registry::new(10);
        registry.record_player(5, Player::new("ghost", Position::default()));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_broadcast_evicts_full_mailbox() {
        let mut registry = Registry::new(10);
        // Capacity 1 is taken by GAME_STATE, so the first broadcast overflows.
        let (slow, _slow_rx) = record(1, 1);
        let (fast, mut fast_rx) = record(2, 8);
        registry.register(slow).unwrap();
        registry.register(fast).unwrap();
        drain_now(&mut fast_rx);

        let evicted = registry.broadcast(&Frame::from("hello"));

        assert_eq!(evicted, vec![1]);
        assert!(!registry.contains(1));
        assert!(registry.contains(2));
        assert_eq!(drain_now(&mut fast_rx), vec!["hello".to_string()]);
    }

    #[test]
    fn test_broadcast_evicts_stopped_worker() {
        let mut registry = Registry::new(10);
        let (gone, gone_rx) = record(1, 8);
        registry.register(gone).unwrap();
        drop(gone_rx);

        assert_eq!(registry.broadcast(&Frame::from("x")), vec![1]);
        assert_eq!(registry.stats().connections, 0);
    }

    #[test]
    fn test_depart_broadcasts_then_removes() {
        let mut registry = Registry::new(10);
        let (leaving, mut leaving_rx) = record(1, 8);
        let (staying, mut staying_rx) = record(2, 8);
        registry.register(leaving).unwrap();
        registry.register(staying).unwrap();
        let player = Player::new("a", Position::new(3.0, 4.0));
        registry.record_player(1, player.clone());
        drain_now(&mut leaving_rx);
        drain_now(&mut staying_rx);

        let removed = registry.depart(1, Some(&Frame::from("bye")));

        assert_eq!(removed, Some(player));
        assert_eq!(drain_now(&mut staying_rx), vec!["bye".to_string()]);
        assert_eq!(drain_now(&mut leaving_rx), vec!["bye".to_string()]);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_depart_after_eviction_still_broadcasts() {
        let mut registry = Registry::new(10);
        let (other, mut other_rx) = record(2, 8);
        registry.register(other).unwrap();
        drain_now(&mut other_rx);

        assert_eq!(registry.depart(1, Some(&Frame::from("bye"))), None);
        assert_eq!(drain_now(&mut other_rx), vec!["bye".to_string()]);
    }

    #[test]
    fn test_snapshot_skips_connections_without_player() {
        let mut registry = Registry::new(10);
        for id in 1..=3 {
            let (r, _rx) = record(id, 8);
            registry.register(r).unwrap();
        }
        registry.record_player(3, Player::new("c", Position::new(3.0, 3.0)));
        registry.record_player(1, Player::new("a", Position::new(1.0, 1.0)));

        let ids: Vec<String> = registry.snapshot().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(
            registry.stats(),
            HubStats {
                connections: 3,
                players: 2
            }
        );
    }

    #[tokio::test]
    async fn test_hub_register_then_broadcast_reaches_new_connection() {
        let hub = spawn_hub(10);
        let (r, mut rx) = record(1, 8);

        let players = hub.register(r).await.unwrap();
        hub.broadcast(Frame::from("after")).await.unwrap();
        hub.stats().await.unwrap();

        assert!(players.is_empty());
        let frames = drain_now(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains(SERVER_GAME_STATE));
        assert_eq!(frames[1], "after");
    }

    #[tokio::test]
    async fn test_hub_publish_is_visible_to_snapshot() {
        let hub = spawn_hub(10);
        let (r, mut rx) = record(1, 8);
        hub.register(r).await.unwrap();

        let player = Player::new("a", Position::new(5.0, 5.0));
        hub.publish(1, player.clone(), Frame::from("update"))
            .await
            .unwrap();

        assert_eq!(hub.snapshot().await.unwrap(), vec![player]);
        assert_eq!(drain_now(&mut rx).last().map(String::as_str), Some("update"));

        hub.deregister(1).await.unwrap();
        let result = hub
            .publish(1, Player::new("a", Position::default()), Frame::from("late"))
            .await;
        assert!(matches!(result, Err(ServerError::Evicted(1))));
        assert!(hub.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_register_and_deregister_are_serialized() {
        let hub = spawn_hub(1000);
        let mut tasks = Vec::new();

        for id in 1..=200usize {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, rx) = mailbox(id, 512);
                hub.register(ConnectionRecord::new(id, addr(), tx)).await.unwrap();
                hub.record_player(id, Player::new(id.to_string(), Position::default()))
                    .await
                    .unwrap();
                hub.broadcast(Frame::from(format!("from {id}"))).await.unwrap();
                if id % 2 == 0 {
                    hub.deregister(id).await.unwrap();
                }
                rx
            }));
        }

        let mut receivers = Vec::new();
        for task in tasks {
            receivers.push(task.await.unwrap());
        }

        let mut ids: Vec<usize> = hub
            .snapshot()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id.parse().unwrap())
            .collect();
        ids.sort_unstable();
        let expected: Vec<usize> = (1..=200).filter(|id| id % 2 == 1).collect();
        assert_eq!(ids, expected);

        // Every mailbox starts with exactly one GAME_STATE.
        for mut rx in receivers {
            let frames = drain_now(&mut rx);
            assert_eq!(
                frames.iter().filter(|f| f.contains(SERVER_GAME_STATE)).count(),
                1
            );
            assert!(frames[0].contains(SERVER_GAME_STATE));
        }
    }

    #[tokio::test]
    async fn test_hub_closed_after_shutdown() {
        let (hub, worker) = Hub::new(10);
        let handle = tokio::spawn(worker.run());

        hub.shutdown().await.unwrap();
        handle.await.unwrap();

        let (r, _rx) = record(1, 8);
        assert!(matches!(hub.register(r).await, Err(ServerError::HubClosed)));
        assert!(matches!(hub.stats().await, Err(ServerError::HubClosed)));
    }
}
