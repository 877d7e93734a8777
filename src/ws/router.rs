use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::models::entity::{EditOperation, Identity, MessageType};
use crate::models::messages::ServerEvent;
use crate::store::{NewChatMessage, NewCodeEdit, Store};
use crate::ws::registry::SessionRegistry;
use crate::ws::room_locks::RoomLocks;
use crate::ws::{ConnId, HubError};

/// Routes room events from a bound connection to the room's subscribers.
///
/// Every operation runs under the room's serialization lock, so events for a
/// single room are observed by all subscribers in the order they were
/// accepted, and never interleave with a lifecycle mutation of the same room.
/// For events with a durable write, the write happens before fan-out; when it
/// fails the event is not broadcast at all and only the sender learns of it.
pub struct EventRouter {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn Store>,
    locks: Arc<RoomLocks>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn Store>,
        locks: Arc<RoomLocks>,
    ) -> Self {
        Self {
            registry,
            store,
            locks,
        }
    }

    /// The sender's identity and current room binding. All room events imply
    /// the bound room; an unbound connection is not subscribed to anything.
    fn sender_context(&self, conn_id: ConnId) -> Result<(Identity, Uuid), HubError> {
        let identity = self
            .registry
            .identity_of(conn_id)
            .ok_or(HubError::NotRegistered)?;
        let room_id = self.registry.room_of(conn_id).ok_or(HubError::NotSubscribed)?;
        Ok((identity, room_id))
    }

    pub async fn code_change(
        &self,
        conn_id: ConnId,
        file_id: Uuid,
        operation: EditOperation,
        position: i64,
        content: Option<String>,
        length: Option<i64>,
    ) -> Result<(), HubError> {
        let (identity, room_id) = self.sender_context(conn_id)?;
        if position < 0 {
            return Err(HubError::Validation(
                "Edit position must not be negative".to_string(),
            ));
        }
        if matches!(operation, EditOperation::Insert | EditOperation::Replace)
            && content.is_none()
        {
            return Err(HubError::Validation(format!(
                "Content is required for {} operations",
                operation.as_str()
            )));
        }

        let lock = self.locks.acquire(room_id);
        let result = {
            let _guard = lock.lock().await;
            let edit = self
                .store
                .append_code_edit(NewCodeEdit {
                    file_id,
                    user_id: identity.user_id,
                    operation,
                    position,
                    content,
                    length,
                })
                .await?;
            self.registry.broadcast(
                room_id,
                ServerEvent::CodeUpdated {
                    file_id,
                    operation,
                    position,
                    content: edit.content,
                    length: edit.length,
                    user_id: identity.user_id,
                    username: identity.username.clone(),
                    timestamp: edit.timestamp,
                },
                Some(conn_id),
            );
            Ok(())
        };
        drop(lock);
        self.locks.release_if_idle(room_id);
        result
    }

    /// Cursor moves are ephemeral: no durable write, never echoed back to the
    /// sender.
    pub async fn cursor_position(
        &self,
        conn_id: ConnId,
        position: Value,
        selection: Option<Value>,
    ) -> Result<(), HubError> {
        let (identity, room_id) = self.sender_context(conn_id)?;
        let lock = self.locks.acquire(room_id);
        {
            let _guard = lock.lock().await;
            self.registry.broadcast(
                room_id,
                ServerEvent::CursorUpdated {
                    user_id: identity.user_id,
                    username: identity.username,
                    position,
                    selection,
                },
                Some(conn_id),
            );
        }
        drop(lock);
        self.locks.release_if_idle(room_id);
        Ok(())
    }

    /// Chat fan-out includes the sender: the broadcast carries the
    /// server-assigned id and timestamp the sender does not have yet.
    pub async fn send_message(
        &self,
        conn_id: ConnId,
        content: String,
        message_type: Option<MessageType>,
        reply_to_id: Option<Uuid>,
    ) -> Result<(), HubError> {
        let (identity, room_id) = self.sender_context(conn_id)?;
        if content.trim().is_empty() {
            return Err(HubError::Validation(
                "Message content is required".to_string(),
            ));
        }

        let lock = self.locks.acquire(room_id);
        let result = {
            let _guard = lock.lock().await;
            let message = self
                .store
                .create_chat_message(NewChatMessage {
                    room_id,
                    user_id: identity.user_id,
                    content,
                    message_type: message_type.unwrap_or(MessageType::Text),
                    reply_to_id,
                })
                .await?;
            self.registry
                .broadcast(room_id, ServerEvent::NewMessage { message }, None);
            Ok(())
        };
        drop(lock);
        self.locks.release_if_idle(room_id);
        result
    }

    pub async fn create_file(
        &self,
        conn_id: ConnId,
        file_name: String,
        language: Option<String>,
    ) -> Result<(), HubError> {
        let (identity, room_id) = self.sender_context(conn_id)?;
        let file_name = file_name.trim().to_string();
        if file_name.is_empty() {
            return Err(HubError::Validation("File name is required".to_string()));
        }

        let lock = self.locks.acquire(room_id);
        let result = {
            let _guard = lock.lock().await;
            let file = self
                .store
                .create_code_file(
                    room_id,
                    &file_name,
                    language.as_deref().unwrap_or("javascript"),
                )
                .await?;
            info!("File {} created in room {}", file.id, room_id);
            self.registry.broadcast(
                room_id,
                ServerEvent::FileCreated {
                    file,
                    created_by: identity.public(),
                },
                None,
            );
            Ok(())
        };
        drop(lock);
        self.locks.release_if_idle(room_id);
        result
    }

    pub async fn delete_file(&self, conn_id: ConnId, file_id: Uuid) -> Result<(), HubError> {
        let (identity, room_id) = self.sender_context(conn_id)?;
        let lock = self.locks.acquire(room_id);
        let result = {
            let _guard = lock.lock().await;
            self.store.delete_code_file(file_id, identity.user_id).await?;
            info!("File {} deleted from room {}", file_id, room_id);
            self.registry.broadcast(
                room_id,
                ServerEvent::FileDeleted {
                    file_id,
                    deleted_by: identity.public(),
                },
                None,
            );
            Ok(())
        };
        drop(lock);
        self.locks.release_if_idle(room_id);
        result
    }

    pub async fn rename_file(
        &self,
        conn_id: ConnId,
        file_id: Uuid,
        new_name: String,
    ) -> Result<(), HubError> {
        let (identity, room_id) = self.sender_context(conn_id)?;
        let new_name = new_name.trim().to_string();
        if new_name.is_empty() {
            return Err(HubError::Validation("File name is required".to_string()));
        }

        let lock = self.locks.acquire(room_id);
        let result = {
            let _guard = lock.lock().await;
            let file = self
                .store
                .rename_code_file(file_id, &new_name, identity.user_id)
                .await?;
            self.registry.broadcast(
                room_id,
                ServerEvent::FileRenamed {
                    file,
                    renamed_by: identity.public(),
                },
                None,
            );
            Ok(())
        };
        drop(lock);
        self.locks.release_if_idle(room_id);
        result
    }
}
