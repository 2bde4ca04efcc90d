//! Connection registry.
//!
//! Maps transport connections to player identities and enforces a single live
//! connection per player. A reconnecting player takes over their identity and
//! the previous connection is evicted.

use std::collections::HashMap;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::Player;
use crate::protocol::{PlayerInfo, WireMessage};

/// Opaque identifier of one transport connection.
pub type ConnectionId = Uuid;

/// Why the server closes a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean shutdown or takeover by a newer connection.
    Normal(String),
    /// Join refused (bad room code, password or name).
    CannotAccept(String),
}

/// Frames queued for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Message(WireMessage),
    Close(CloseReason),
}

/// Sending half of a connection's outbound queue.
///
/// Sending only enqueues; the socket write happens in the connection's own
/// task, so it is safe to call while holding the session lock.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// Queue a message. Returns `false` if the writer task is gone.
    pub fn send(&self, msg: WireMessage) -> bool {
        self.tx.send(Outbound::Message(msg)).is_ok()
    }

    pub fn close(&self, reason: CloseReason) {
        let _ = self.tx.send(Outbound::Close(reason));
    }
}

struct Connection {
    handle: ConnectionHandle,
    player_id: Option<String>,
    dead: bool,
}

/// Result of [`ConnectionRegistry::bind_player`].
#[derive(Debug)]
pub struct Binding {
    pub player_id: String,
    /// The player id was reused.
    pub reconnected: bool,
    /// Connection that owned the player id before this bind. Already removed
    /// from the registry; the caller closes it.
    pub evicted: Option<ConnectionHandle>,
}

/// Result of [`ConnectionRegistry::unbind`].
#[derive(Debug, PartialEq, Eq)]
pub enum Unbound {
    /// Unknown connection: already removed, or evicted by a takeover.
    NotRegistered,
    /// The connection never joined.
    Anonymous,
    /// The connection owned `player_id`. `removed` tells whether the player
    /// left the roster or is kept for a later reconnect.
    Left { player_id: String, removed: bool },
}

/// All live connections and known players of a room.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    /// player id -> connection currently owning it.
    owners: HashMap<String, ConnectionId>,
    /// Known players in join order.
    players: Vec<Player>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ConnectionId, handle: ConnectionHandle) {
        self.connections.insert(
            id,
            Connection {
                handle,
                player_id: None,
                dead: false,
            },
        );
    }

    pub fn handle(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(&id).map(|c| &c.handle)
    }

    /// Player bound to a connection, if it joined.
    pub fn player_of(&self, id: ConnectionId) -> Option<&str> {
        self.connections.get(&id)?.player_id.as_deref()
    }

    /// Attach a player identity to a registered connection.
    ///
    /// A `requested` id that is still known is reused and whatever connection
    /// owned it is evicted. Otherwise a fresh id is minted. Returns `None` if
    /// the connection is not registered.
    pub fn bind_player(&mut self, id: ConnectionId, requested: Option<&str>, name: &str) -> Option<Binding> {
        if !self.connections.contains_key(&id) {
            return None;
        }

        let known = requested.and_then(|r| self.players.iter_mut().find(|p| p.id == r));
        let (player_id, reconnected) = match known {
            Some(player) => {
                player.name = name.to_string();
                (player.id.clone(), true)
            }
            None => {
                let player_id = Uuid::new_v4().to_string();
                self.players.push(Player {
                    id: player_id.clone(),
                    name: name.to_string(),
                });
                (player_id, false)
            }
        };

        let evicted = match self.owners.insert(player_id.clone(), id) {
            Some(previous) if previous != id => self.connections.remove(&previous).map(|c| c.handle),
            _ => None,
        };

        if let Some(connection) = self.connections.get_mut(&id) {
            connection.player_id = Some(player_id.clone());
        }

        Some(Binding {
            player_id,
            reconnected,
            evicted,
        })
    }

    /// Remove a connection.
    ///
    /// Its player is dropped from the roster only when no game is running and
    /// no newer connection has taken the player over.
    pub fn unbind(&mut self, id: ConnectionId, game_running: bool) -> Unbound {
        let Some(connection) = self.connections.remove(&id) else {
            return Unbound::NotRegistered;
        };
        let Some(player_id) = connection.player_id else {
            return Unbound::Anonymous;
        };

        if self.owners.get(&player_id) != Some(&id) {
            return Unbound::NotRegistered;
        }
        self.owners.remove(&player_id);

        let removed = !game_running && self.remove_player(&player_id);
        Unbound::Left { player_id, removed }
    }

    /// Roster in join order. A reconnect keeps its original slot.
    pub fn snapshot_players(&self) -> Vec<PlayerInfo> {
        self.players
            .iter()
            .map(|p| PlayerInfo {
                id: p.id.clone(),
                name: p.name.clone(),
            })
            .collect()
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }

    /// Whether a live connection currently owns `player_id`.
    pub fn is_connected(&self, player_id: &str) -> bool {
        self.owners.contains_key(player_id)
    }

    pub fn remove_player(&mut self, player_id: &str) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.id != player_id);
        self.players.len() != before
    }

    /// Drop every player without a live connection. Returns their ids.
    pub fn prune_disconnected(&mut self) -> Vec<String> {
        let (kept, pruned): (Vec<_>, Vec<_>) = std::mem::take(&mut self.players)
            .into_iter()
            .partition(|p| self.owners.contains_key(&p.id));
        self.players = kept;
        pruned.into_iter().map(|p| p.id).collect()
    }

    /// Best-effort send to every joined connection.
    ///
    /// A failed send marks the connection dead; it is skipped from then on and
    /// returned so the caller can unbind it like any other disconnect.
    pub fn broadcast(&mut self, msg: &WireMessage) -> Vec<ConnectionId> {
        let mut dead = Vec::new();

        for (id, connection) in self.connections.iter_mut() {
            if connection.dead || connection.player_id.is_none() {
                continue;
            }
            if !connection.handle.send(msg.clone()) {
                tracing::debug!("Connection {} is gone, marking dead", id);
                connection.dead = true;
                dead.push(*id);
            }
        }

        dead
    }

    /// Remove every connection, returning their handles for closing.
    pub fn drain(&mut self) -> Vec<ConnectionHandle> {
        self.owners.clear();
        self.connections.drain().map(|(_, c)| c.handle).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(registry: &mut ConnectionRegistry) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        registry.register(id, ConnectionHandle::new(tx));
        (id, rx)
    }

    #[test]
    fn test_bind_mints_ids_in_join_order() {
        let mut registry = ConnectionRegistry::new();
        let (a, _rx_a) = connect(&mut registry);
        let (b, _rx_b) = connect(&mut registry);

        let alice = registry.bind_player(a, None, "Alice").unwrap();
        let bob = registry.bind_player(b, Some("unknown-id"), "Bob").unwrap();

        assert!(!alice.reconnected);
        assert!(!bob.reconnected);
        assert_ne!(alice.player_id, bob.player_id);
        let names: Vec<_> = registry.snapshot_players().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_takeover_evicts_previous_connection_and_keeps_slot() {
        let mut registry = ConnectionRegistry::new();
        let (a, _rx_a) = connect(&mut registry);
        let (b, _rx_b) = connect(&mut registry);
        let alice = registry.bind_player(a, None, "Alice").unwrap().player_id;
        registry.bind_player(b, None, "Bob").unwrap();

        let (a2, _rx_a2) = connect(&mut registry);
        let binding = registry.bind_player(a2, Some(&alice), "Alice 2").unwrap();

        assert!(binding.reconnected);
        assert_eq!(binding.player_id, alice);
        assert!(binding.evicted.is_some());
        assert!(registry.handle(a).is_none());

        let roster = registry.snapshot_players();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, alice);
        assert_eq!(roster[0].name, "Alice 2");

        // the evicted socket tearing down late must not remove the player
        assert_eq!(registry.unbind(a, false), Unbound::NotRegistered);
        assert!(registry.has_player(&alice));
        assert!(registry.is_connected(&alice));
    }

    #[test]
    fn test_unbind_keeps_player_while_game_runs() {
        let mut registry = ConnectionRegistry::new();
        let (a, _rx) = connect(&mut registry);
        let alice = registry.bind_player(a, None, "Alice").unwrap().player_id;

        assert_eq!(
            registry.unbind(a, true),
            Unbound::Left {
                player_id: alice.clone(),
                removed: false
            }
        );
        assert!(registry.has_player(&alice));
        assert!(!registry.is_connected(&alice));

        assert_eq!(registry.prune_disconnected(), vec![alice.clone()]);
        assert!(!registry.has_player(&alice));
    }

    #[test]
    fn test_unbind_removes_player_when_idle() {
        let mut registry = ConnectionRegistry::new();
        let (a, _rx) = connect(&mut registry);
        let (anon, _rx_anon) = connect(&mut registry);
        let alice = registry.bind_player(a, None, "Alice").unwrap().player_id;

        assert_eq!(registry.unbind(anon, false), Unbound::Anonymous);
        assert_eq!(
            registry.unbind(a, false),
            Unbound::Left {
                player_id: alice,
                removed: true
            }
        );
        assert!(registry.snapshot_players().is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_broadcast_skips_anonymous_and_reports_dead() {
        let mut registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(&mut registry);
        let (b, rx_b) = connect(&mut registry);
        let (_anon, mut rx_anon) = connect(&mut registry);
        registry.bind_player(a, None, "Alice").unwrap();
        registry.bind_player(b, None, "Bob").unwrap();
        drop(rx_b);

        let msg = WireMessage::GameStarted { question_count: 3 };
        let dead = registry.broadcast(&msg);

        assert_eq!(dead, vec![b]);
        assert!(matches!(rx_a.try_recv(), Ok(Outbound::Message(m)) if m == msg));
        assert!(rx_anon.try_recv().is_err());

        // dead connections are not retried
        assert!(registry.broadcast(&msg).is_empty());
    }
}
