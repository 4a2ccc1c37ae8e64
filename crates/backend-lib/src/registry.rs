// ============================
// crates/backend-lib/src/registry.rs
// ============================
//! Connection registry: live connections and room membership.
//!
//! This is the only component holding mutable shared state. It is an
//! explicitly constructed instance owned by `AppState`, so tests can spin up
//! isolated registries. Room mutation and broadcast iteration for the same
//! chat are serialized by the per-entry map guard; distinct chats proceed in
//! parallel.

use dashmap::DashMap;
use homelet_common::{ChatId, Identity, ServerEvent, UserId};
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ChatError;

/// Opaque identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ConnectionEntry {
    identity: Identity,
    outbox: mpsc::Sender<ServerEvent>,
    joined: HashSet<ChatId>,
}

struct RoomMember {
    conn_id: ConnectionId,
    user_id: UserId,
    outbox: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
struct RoomEntry {
    members: Vec<RoomMember>,
}

impl RoomEntry {
    fn prune_closed(&mut self) {
        self.members.retain(|m| !m.outbox.is_closed());
    }
}

/// Registry of live connections and the rooms they joined.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    rooms: DashMap<ChatId, RoomEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a validated identity with a connection. Called only after
    /// the handshake credential resolved successfully.
    pub fn register(
        &self,
        conn_id: ConnectionId,
        identity: Identity,
        outbox: mpsc::Sender<ServerEvent>,
    ) {
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                identity,
                outbox,
                joined: HashSet::new(),
            },
        );
    }

    /// Add a connection to the room for `chat_id`. Participant eligibility
    /// is the protocol layer's job; the registry only does bookkeeping.
    pub fn join(&self, conn_id: ConnectionId, chat_id: &str) -> Result<(), ChatError> {
        let (user_id, outbox) = {
            let mut conn = self.connections.get_mut(&conn_id).ok_or_else(|| {
                ChatError::Unauthorized("connection is not registered".to_string())
            })?;
            conn.joined.insert(chat_id.to_string());
            (conn.identity.id.clone(), conn.outbox.clone())
        };

        let mut room = self.rooms.entry(chat_id.to_string()).or_default();
        if !room.members.iter().any(|m| m.conn_id == conn_id) {
            room.members.push(RoomMember {
                conn_id,
                user_id,
                outbox,
            });
        }
        Ok(())
    }

    /// Remove a connection from one room. Idempotent: removing a non-member
    /// is a no-op.
    pub fn leave(&self, conn_id: ConnectionId, chat_id: &str) {
        if let Some(mut conn) = self.connections.get_mut(&conn_id) {
            conn.joined.remove(chat_id);
        }
        if let Some(mut room) = self.rooms.get_mut(chat_id) {
            room.members.retain(|m| m.conn_id != conn_id);
        }
        self.rooms.remove_if(chat_id, |_, room| room.members.is_empty());
    }

    /// Drop a connection and all of its room memberships. Invoked
    /// synchronously on disconnect so a reconnect never races a stale id.
    pub fn unregister_all(&self, conn_id: ConnectionId) {
        let Some((_, entry)) = self.connections.remove(&conn_id) else {
            return;
        };
        for chat_id in entry.joined {
            if let Some(mut room) = self.rooms.get_mut(&chat_id) {
                room.members.retain(|m| m.conn_id != conn_id);
            }
            self.rooms.remove_if(&chat_id, |_, room| room.members.is_empty());
        }
    }

    /// Deliver `event` to every connection currently joined to `chat_id`,
    /// optionally skipping one (the sender). Delivery is best-effort
    /// `try_send`: a full or closed outbox is not an error here, persisted
    /// history remains the source of truth. Returns the number of
    /// connections the event was handed to.
    pub fn broadcast(
        &self,
        chat_id: &str,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        {
            let Some(mut room) = self.rooms.get_mut(chat_id) else {
                return 0;
            };
            room.prune_closed();
            for member in &room.members {
                if exclude == Some(member.conn_id) {
                    continue;
                }
                if member.outbox.try_send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    tracing::debug!(
                        chat_id,
                        user_id = %member.user_id,
                        "dropped broadcast: outbox full or closed"
                    );
                }
            }
        }
        self.rooms.remove_if(chat_id, |_, room| room.members.is_empty());
        delivered
    }

    pub fn is_member(&self, conn_id: ConnectionId, chat_id: &str) -> bool {
        self.rooms
            .get(chat_id)
            .map(|room| room.members.iter().any(|m| m.conn_id == conn_id))
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_member_count(&self, chat_id: &str) -> usize {
        self.rooms.get(chat_id).map(|r| r.members.len()).unwrap_or(0)
    }
}
