use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::models::entity::PublicUser;
use crate::store::Store;
use crate::ws::registry::SessionRegistry;
use crate::ws::ConnId;

/// Derives per-room presence from the live session registry and maintains a
/// durable session-record mirror for external queries.
///
/// Presence is never stored as ground truth: `active_users` recomputes it
/// from the registry on every call, so "who is a member" and "who is present"
/// cannot drift. The mirror writes are best-effort: a failed write is
/// logged and the in-memory view stays authoritative for live fan-out.
pub struct PresenceTracker {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn Store>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<SessionRegistry>, store: Arc<dyn Store>) -> Self {
        Self { registry, store }
    }

    pub fn active_users(&self, room_id: Uuid) -> Vec<PublicUser> {
        self.registry.active_users(room_id)
    }

    /// Record a fresh connection: user online flag plus a session record with
    /// no room binding yet.
    pub async fn mirror_connect(&self, conn_id: ConnId, user_id: Uuid) {
        if let Err(e) = self.store.set_user_online(user_id, true).await {
            warn!("Failed to mark user {} online: {}", user_id, e);
        }
        if let Err(e) = self.store.upsert_session_record(conn_id, user_id, None).await {
            warn!("Failed to mirror session record for {}: {}", conn_id, e);
        }
    }

    /// Mirror a room (re)binding of one connection.
    pub async fn mirror_bind(&self, conn_id: ConnId, user_id: Uuid, room_id: Option<Uuid>) {
        if let Err(e) = self
            .store
            .upsert_session_record(conn_id, user_id, room_id)
            .await
        {
            warn!("Failed to mirror session record for {}: {}", conn_id, e);
        }
    }

    /// Disconnect cleanup: mark the user offline and drop the session record.
    /// The two steps are independent; a failure in one never blocks the other.
    pub async fn mirror_disconnect(&self, conn_id: ConnId, user_id: Uuid) {
        if let Err(e) = self.store.set_user_online(user_id, false).await {
            warn!("Failed to mark user {} offline: {}", user_id, e);
        }
        if let Err(e) = self.store.delete_session_record(conn_id).await {
            warn!("Failed to delete session record for {}: {}", conn_id, e);
        }
    }
}
