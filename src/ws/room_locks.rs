use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Per-room serialization boundary. Lifecycle mutations and event dispatch
/// for the same room take the same lock, so concurrent join/leave/create and
/// broadcasts for one room are totally ordered while distinct rooms proceed
/// in parallel.
///
/// Locks are created lazily and garbage-collected once no task holds them;
/// the lock itself carries no state, so dropping and re-creating one is safe.
pub struct RoomLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl Default for RoomLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the lock for a room. Callers typically follow with
    /// `.lock_owned().await` and drop the guard before `release_if_idle`.
    pub fn acquire(&self, room_id: Uuid) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(room_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the room's lock entry when nobody is holding or waiting on it.
    pub fn release_if_idle(&self, room_id: Uuid) {
        let mut locks = self.locks.lock().unwrap();
        if let Some(lock) = locks.get(&room_id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&room_id);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_entries_are_garbage_collected() {
        let locks = RoomLocks::new();
        let room = Uuid::new_v4();

        let guard = locks.acquire(room).lock_owned().await;
        locks.release_if_idle(room);
        // Still held, must not be removed.
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.release_if_idle(room);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn same_room_is_mutually_exclusive() {
        let locks = Arc::new(RoomLocks::new());
        let room = Uuid::new_v4();

        let guard = locks.acquire(room).lock_owned().await;
        let second = locks.acquire(room);
        assert!(second.try_lock().is_err());
        drop(guard);
        assert!(second.try_lock().is_ok());
    }
}
