use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use uuid::Uuid;

use crate::models::entity::{Identity, PublicUser};
use crate::models::messages::ServerEvent;
use crate::ws::{ConnId, HubError};

struct SessionEntry {
    identity: Identity,
    room_id: Option<Uuid>,
    tx: UnboundedSender<ServerEvent>,
}

/// Process-wide table of live connections. Each entry is bound to exactly one
/// identity and at most one room at a time.
///
/// All operations are synchronous and never suspend; the inner mutex is only
/// held for map access, so the registry is safe to call from any connection's
/// event handler. Explicitly owned: constructed at startup and passed by
/// `Arc` into every handler.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ConnId, SessionEntry>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a freshly authenticated connection, not yet in any room.
    /// A duplicate connection id is a programming invariant violation.
    pub fn register(
        &self,
        conn_id: ConnId,
        identity: Identity,
        tx: UnboundedSender<ServerEvent>,
    ) -> Result<(), HubError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&conn_id) {
            return Err(HubError::AlreadyRegistered(conn_id));
        }
        sessions.insert(
            conn_id,
            SessionEntry {
                identity,
                room_id: None,
                tx,
            },
        );
        Ok(())
    }

    /// Remove a connection. Idempotent: racing teardown paths may both call
    /// this, only the first observes the entry.
    pub fn unregister(&self, conn_id: ConnId) -> Option<(Identity, Option<Uuid>)> {
        self.sessions
            .lock()
            .unwrap()
            .remove(&conn_id)
            .map(|entry| (entry.identity, entry.room_id))
    }

    /// Bind the connection to a room (or to none). A connection is in at most
    /// one room's event stream; rebinding implicitly unbinds the previous
    /// room, which is returned so callers can notify it.
    pub fn bind_room(
        &self,
        conn_id: ConnId,
        room_id: Option<Uuid>,
    ) -> Result<Option<Uuid>, HubError> {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.get_mut(&conn_id).ok_or(HubError::NotRegistered)?;
        Ok(std::mem::replace(&mut entry.room_id, room_id))
    }

    pub fn room_of(&self, conn_id: ConnId) -> Option<Uuid> {
        self.sessions
            .lock()
            .unwrap()
            .get(&conn_id)
            .and_then(|entry| entry.room_id)
    }

    pub fn identity_of(&self, conn_id: ConnId) -> Option<Identity> {
        self.sessions
            .lock()
            .unwrap()
            .get(&conn_id)
            .map(|entry| entry.identity.clone())
    }

    /// Queue an event for one connection. A closed receiver just means the
    /// connection is tearing down; delivery is dropped silently.
    pub fn send_to(&self, conn_id: ConnId, event: ServerEvent) {
        let sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get(&conn_id) {
            if entry.tx.send(event).is_err() {
                debug!("Dropping event for closing connection {}", conn_id);
            }
        }
    }

    /// Fan an event out to every connection bound to `room_id`, optionally
    /// excluding one sender. Events queued here are observed by each
    /// subscriber in the order the calls were made.
    pub fn broadcast(&self, room_id: Uuid, event: ServerEvent, exclude: Option<ConnId>) {
        let sessions = self.sessions.lock().unwrap();
        for (conn_id, entry) in sessions.iter() {
            if entry.room_id != Some(room_id) || Some(*conn_id) == exclude {
                continue;
            }
            if entry.tx.send(event.clone()).is_err() {
                debug!("Dropping broadcast for closing connection {}", conn_id);
            }
        }
    }

    /// Live users currently bound to the room, deduplicated by user id: a
    /// second connection from the same user is still reported once. Sorted by
    /// username for stable output.
    pub fn active_users(&self, room_id: Uuid) -> Vec<PublicUser> {
        let sessions = self.sessions.lock().unwrap();
        let mut seen = HashSet::new();
        let mut users: Vec<PublicUser> = sessions
            .values()
            .filter(|entry| entry.room_id == Some(room_id))
            .filter(|entry| seen.insert(entry.identity.user_id))
            .map(|entry| entry.identity.public())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Number of distinct rooms with at least one bound connection.
    pub fn occupied_room_count(&self) -> usize {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .values()
            .filter_map(|entry| entry.room_id)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Number of distinct users across all live connections.
    pub fn online_user_count(&self) -> usize {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .values()
            .map(|entry| entry.identity.user_id)
            .collect::<HashSet<_>>()
            .len()
    }
}
