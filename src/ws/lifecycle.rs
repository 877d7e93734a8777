use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::models::entity::{Identity, MemberRole, RoomMember};
use crate::models::messages::ServerEvent;
use crate::store::{NewRoom, Store};
use crate::ws::presence::PresenceTracker;
use crate::ws::registry::SessionRegistry;
use crate::ws::room_locks::RoomLocks;
use crate::ws::{ConnId, HubError};

const DEFAULT_MAX_MEMBERS: i32 = 10;

/// Orchestrates the connection-room state machine:
/// `Unauthenticated -> Authenticated -> RoomBound -> Disconnected`.
///
/// Every mutation that touches a shared room invariant (capacity, membership
/// uniqueness, owner singularity) runs under that room's serialization lock,
/// so competing joins for one free slot are totally ordered. Disconnect
/// cleanup is idempotent and safe for connections that never got past the
/// handshake.
pub struct LifecycleCoordinator {
    registry: Arc<SessionRegistry>,
    presence: Arc<PresenceTracker>,
    store: Arc<dyn Store>,
    locks: Arc<RoomLocks>,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        presence: Arc<PresenceTracker>,
        store: Arc<dyn Store>,
        locks: Arc<RoomLocks>,
    ) -> Self {
        Self {
            registry,
            presence,
            store,
            locks,
        }
    }

    pub async fn create_room(
        &self,
        conn_id: ConnId,
        name: String,
        description: Option<String>,
        is_private: Option<bool>,
        max_members: Option<i32>,
    ) -> Result<(), HubError> {
        let identity = self
            .registry
            .identity_of(conn_id)
            .ok_or(HubError::NotRegistered)?;

        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(HubError::Validation("Room name is required".to_string()));
        }
        let max_members = max_members.unwrap_or(DEFAULT_MAX_MEMBERS);
        if max_members < 1 {
            return Err(HubError::Validation(
                "maxMembers must be at least 1".to_string(),
            ));
        }

        // Room and owner membership land in one transaction.
        let room = self
            .store
            .create_room(
                identity.user_id,
                NewRoom {
                    name,
                    description: description.unwrap_or_default(),
                    is_private: is_private.unwrap_or(false),
                    max_members,
                },
            )
            .await?;
        let room_id = room.id;

        let lock = self.locks.acquire(room_id);
        let result: Result<Option<Uuid>, HubError> = {
            let _guard = lock.lock().await;
            let prev = self.registry.bind_room(conn_id, Some(room_id))?;
            self.presence
                .mirror_bind(conn_id, identity.user_id, Some(room_id))
                .await;
            self.registry
                .send_to(conn_id, ServerEvent::RoomCreated { room });
            let active_users = self.presence.active_users(room_id);
            self.registry
                .broadcast(room_id, ServerEvent::RoomPresence { active_users }, None);
            Ok(prev)
        };
        drop(lock);
        self.locks.release_if_idle(room_id);

        let prev = result?;
        if let Some(prev_room) = prev.filter(|p| *p != room_id) {
            self.announce_departure(prev_room, &identity).await;
        }
        info!("Room {} created by {}", room_id, identity.username);
        Ok(())
    }

    pub async fn join_room(&self, conn_id: ConnId, room_id: Uuid) -> Result<(), HubError> {
        let identity = self
            .registry
            .identity_of(conn_id)
            .ok_or(HubError::NotRegistered)?;

        let lock = self.locks.acquire(room_id);
        let result = {
            let _guard = lock.lock().await;
            self.join_room_locked(conn_id, &identity, room_id).await
        };
        drop(lock);
        self.locks.release_if_idle(room_id);

        let prev = result?;
        if let Some(prev_room) = prev.filter(|p| *p != room_id) {
            self.announce_departure(prev_room, &identity).await;
        }
        info!("User {} joined room {}", identity.username, room_id);
        Ok(())
    }

    async fn join_room_locked(
        &self,
        conn_id: ConnId,
        identity: &Identity,
        room_id: Uuid,
    ) -> Result<Option<Uuid>, HubError> {
        let mut snapshot = self
            .store
            .get_room_snapshot(room_id)
            .await?
            .ok_or(HubError::RoomNotFound)?;
        if !snapshot.room.is_active {
            return Err(HubError::RoomInactive);
        }

        let already_member = self
            .store
            .find_membership(identity.user_id, room_id)
            .await?
            .is_some();
        if !already_member {
            // Count and capacity are read under the room lock: two competing
            // joins for the last free slot cannot both pass this check.
            let members = self.store.count_members(room_id).await?;
            if members >= i64::from(snapshot.room.max_members) {
                return Err(HubError::RoomFull);
            }
            self.store
                .create_membership(identity.user_id, room_id, MemberRole::Member)
                .await?;
            snapshot.members.push(RoomMember {
                user: identity.public(),
                role: MemberRole::Member,
                joined_at: Utc::now(),
            });
        }

        let prev = self.registry.bind_room(conn_id, Some(room_id))?;
        self.presence
            .mirror_bind(conn_id, identity.user_id, Some(room_id))
            .await;

        self.registry.broadcast(
            room_id,
            ServerEvent::UserJoined {
                user_id: identity.user_id,
                username: identity.username.clone(),
                joined_at: Utc::now(),
            },
            Some(conn_id),
        );
        let active_users = self.presence.active_users(room_id);
        self.registry.send_to(
            conn_id,
            ServerEvent::RoomJoined {
                room: Box::new(snapshot),
                active_users: active_users.clone(),
            },
        );
        self.registry
            .broadcast(room_id, ServerEvent::RoomPresence { active_users }, None);
        Ok(prev)
    }

    pub async fn leave_room(&self, conn_id: ConnId) -> Result<(), HubError> {
        let identity = self
            .registry
            .identity_of(conn_id)
            .ok_or(HubError::NotRegistered)?;
        let room_id = self.registry.room_of(conn_id).ok_or(HubError::NotInRoom)?;

        let lock = self.locks.acquire(room_id);
        let result = {
            let _guard = lock.lock().await;
            self.leave_room_locked(conn_id, &identity, room_id).await
        };
        drop(lock);
        self.locks.release_if_idle(room_id);
        result
    }

    async fn leave_room_locked(
        &self,
        conn_id: ConnId,
        identity: &Identity,
        room_id: Uuid,
    ) -> Result<(), HubError> {
        let membership = self
            .store
            .find_membership(identity.user_id, room_id)
            .await?
            .ok_or(HubError::NotMember)?;
        if membership.role == MemberRole::Owner {
            return Err(HubError::OwnerCannotLeave);
        }

        self.store
            .delete_membership(identity.user_id, room_id)
            .await?;
        self.registry.bind_room(conn_id, None)?;
        self.presence
            .mirror_bind(conn_id, identity.user_id, None)
            .await;

        self.registry.broadcast(
            room_id,
            ServerEvent::UserLeft {
                user_id: identity.user_id,
                username: identity.username.clone(),
                left_at: Utc::now(),
            },
            None,
        );
        let active_users = self.presence.active_users(room_id);
        self.registry
            .broadcast(room_id, ServerEvent::RoomPresence { active_users }, None);
        self.registry
            .send_to(conn_id, ServerEvent::RoomLeft { room_id });
        info!("User {} left room {}", identity.username, room_id);
        Ok(())
    }

    /// Tear down one connection. Fired exactly once per network close,
    /// explicit disconnect or handler error, but safe to race: only the call
    /// that observes the registry entry performs cleanup. Each cleanup step
    /// is best-effort and independent of the others.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let Some((identity, room_id)) = self.registry.unregister(conn_id) else {
            return;
        };
        self.presence
            .mirror_disconnect(conn_id, identity.user_id)
            .await;
        if let Some(room_id) = room_id {
            self.announce_departure(room_id, &identity).await;
        }
        info!(
            "Connection {} for user {} cleaned up",
            conn_id, identity.username
        );
    }

    /// Tell a room that a user's connection left its event stream, with a
    /// refreshed presence list.
    async fn announce_departure(&self, room_id: Uuid, identity: &Identity) {
        let lock = self.locks.acquire(room_id);
        {
            let _guard = lock.lock().await;
            self.registry.broadcast(
                room_id,
                ServerEvent::UserLeft {
                    user_id: identity.user_id,
                    username: identity.username.clone(),
                    left_at: Utc::now(),
                },
                None,
            );
            let active_users = self.presence.active_users(room_id);
            self.registry
                .broadcast(room_id, ServerEvent::RoomPresence { active_users }, None);
        }
        drop(lock);
        self.locks.release_if_idle(room_id);
    }
}
