//! Shared fixtures for the coordination-layer tests: a fully wired hub over
//! the in-memory store, with channel-backed fake connections standing in for
//! sockets.

use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::models::entity::Identity;
use crate::models::messages::ServerEvent;
use crate::store::mem::MemStore;
use crate::store::Store;
use crate::ws::lifecycle::LifecycleCoordinator;
use crate::ws::presence::PresenceTracker;
use crate::ws::registry::SessionRegistry;
use crate::ws::room_locks::RoomLocks;
use crate::ws::router::EventRouter;
use crate::ws::ConnId;

pub struct TestHub {
    pub registry: Arc<SessionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub lifecycle: Arc<LifecycleCoordinator>,
    pub router: Arc<EventRouter>,
    pub store: Arc<MemStore>,
}

pub fn hub() -> TestHub {
    let store = Arc::new(MemStore::new());
    let registry = Arc::new(SessionRegistry::new());
    let locks = Arc::new(RoomLocks::new());
    let presence = Arc::new(PresenceTracker::new(
        registry.clone(),
        store.clone() as Arc<dyn Store>,
    ));
    let lifecycle = Arc::new(LifecycleCoordinator::new(
        registry.clone(),
        presence.clone(),
        store.clone() as Arc<dyn Store>,
        locks.clone(),
    ));
    let router = Arc::new(EventRouter::new(
        registry.clone(),
        store.clone() as Arc<dyn Store>,
        locks,
    ));
    TestHub {
        registry,
        presence,
        lifecycle,
        router,
        store,
    }
}

pub struct TestConn {
    pub conn_id: ConnId,
    pub user_id: Uuid,
    pub rx: UnboundedReceiver<ServerEvent>,
}

impl TestConn {
    /// Pop everything queued so far.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Register a new authenticated connection for a fresh user.
pub fn connect(hub: &TestHub, username: &str) -> TestConn {
    let user = hub.store.add_user(username);
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let conn_id = Uuid::new_v4();
    hub.registry
        .register(
            conn_id,
            Identity {
                user_id: user.id,
                username: user.username.clone(),
                avatar: user.avatar.clone(),
            },
            tx,
        )
        .expect("fresh connection id");
    TestConn {
        conn_id,
        user_id: user.id,
        rx,
    }
}
