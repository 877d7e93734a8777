//! Real-time room coordination: session registry, derived presence, per-room
//! serialized event routing and the join/leave/create/disconnect lifecycle.

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

pub mod handler;
pub mod lifecycle;
pub mod presence;
pub mod registry;
pub mod room_locks;
pub mod router;

#[cfg(test)]
pub(crate) mod testutil;

/// Opaque identifier of one live connection, unique per socket.
pub type ConnId = Uuid;

/// Failures of room coordination operations. Everything except
/// `AlreadyRegistered` is reported to the offending sender as a typed
/// `error` event and leaves the connection open; `AlreadyRegistered` is a
/// programming invariant violation and tears the connection down.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("{0}")]
    Validation(String),
    #[error("Room not found")]
    RoomNotFound,
    #[error("Room is not active")]
    RoomInactive,
    #[error("Room is full")]
    RoomFull,
    #[error("You are not a member of this room")]
    NotMember,
    #[error("The room owner cannot leave the room")]
    OwnerCannotLeave,
    #[error("You are not in a room")]
    NotInRoom,
    #[error("Not subscribed to this room")]
    NotSubscribed,
    #[error("Connection is not registered")]
    NotRegistered,
    #[error("Connection {0} is already registered")]
    AlreadyRegistered(ConnId),
    #[error(transparent)]
    Store(#[from] StoreError),
}
