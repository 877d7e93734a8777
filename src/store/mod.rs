use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::entity::{
    ChatMessage, CodeEdit, CodeFile, EditOperation, MemberRole, Membership, MessageType, Room,
    RoomSnapshot, User,
};

pub mod pg;

#[cfg(test)]
pub mod mem;

/// Errors surfaced by the persistence collaborator. Business-rule rejections
/// (`NotFound`, `Forbidden`, `OwnerImmutable`) are distinct from `Database`,
/// which signals a failed durable write and suppresses any fan-out.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Permission denied")]
    Forbidden,
    #[error("The room owner membership cannot be removed or re-roled")]
    OwnerImmutable,
    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub description: String,
    pub is_private: bool,
    pub max_members: i32,
}

#[derive(Debug, Clone)]
pub struct NewCodeEdit {
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub operation: EditOperation,
    pub position: i64,
    pub content: Option<String>,
    pub length: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to_id: Option<Uuid>,
}

/// Durable storage consumed by the coordination layer. Injected as a trait
/// object so the room machinery never talks to SQL directly.
///
/// Single-row operations are atomic; `create_room` is the one multi-row flow
/// and runs inside a transaction (room plus owner membership).
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a room and its OWNER membership atomically.
    async fn create_room(&self, owner_id: Uuid, room: NewRoom) -> Result<Room, StoreError>;

    /// Room metadata, member list, code files and the 50 most recent chat
    /// messages. `None` when the room does not exist.
    async fn get_room_snapshot(&self, room_id: Uuid) -> Result<Option<RoomSnapshot>, StoreError>;

    async fn find_membership(
        &self,
        user_id: Uuid,
        room_id: Uuid,
    ) -> Result<Option<Membership>, StoreError>;

    async fn count_members(&self, room_id: Uuid) -> Result<i64, StoreError>;

    async fn create_membership(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        role: MemberRole,
    ) -> Result<(), StoreError>;

    /// Remove a membership. Rejects the OWNER membership with
    /// [`StoreError::OwnerImmutable`]; only room deletion removes an owner.
    async fn delete_membership(&self, user_id: Uuid, room_id: Uuid) -> Result<(), StoreError>;

    /// Change a member's role. The OWNER membership can neither be re-roled
    /// nor can a second membership be promoted to OWNER.
    async fn update_membership_role(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        role: MemberRole,
    ) -> Result<(), StoreError>;

    async fn append_code_edit(&self, edit: NewCodeEdit) -> Result<CodeEdit, StoreError>;

    async fn create_chat_message(&self, msg: NewChatMessage) -> Result<ChatMessage, StoreError>;

    async fn create_code_file(
        &self,
        room_id: Uuid,
        name: &str,
        language: &str,
    ) -> Result<CodeFile, StoreError>;

    /// Delete a file (and its edit log). The acting user must be a member of
    /// the file's room.
    async fn delete_code_file(&self, file_id: Uuid, user_id: Uuid) -> Result<(), StoreError>;

    async fn rename_code_file(
        &self,
        file_id: Uuid,
        new_name: &str,
        user_id: Uuid,
    ) -> Result<CodeFile, StoreError>;

    async fn upsert_session_record(
        &self,
        conn_id: Uuid,
        user_id: Uuid,
        room_id: Option<Uuid>,
    ) -> Result<(), StoreError>;

    async fn delete_session_record(&self, conn_id: Uuid) -> Result<(), StoreError>;

    async fn set_user_online(&self, user_id: Uuid, online: bool) -> Result<(), StoreError>;

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
}
