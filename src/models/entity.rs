use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Full user row as stored. Only ever exposed to the coordination layer;
/// clients see [`PublicUser`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// The subset of a user profile that is safe to broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// Authenticated user reference bound to a live connection.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
}

impl Identity {
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.user_id,
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub is_private: bool,
    pub max_members: i32,
    pub is_active: bool,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership role. Exactly one OWNER per room, matching `Room::owner_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Owner,
    Member,
    Viewer,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "OWNER",
            MemberRole::Member => "MEMBER",
            MemberRole::Viewer => "VIEWER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OWNER" => Some(MemberRole::Owner),
            "MEMBER" => Some(MemberRole::Member),
            "VIEWER" => Some(MemberRole::Viewer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub user_id: Uuid,
    pub room_id: Uuid,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// A room member as shown to clients: public profile plus role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub user: PublicUser,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// Everything a joining client needs to render the room: metadata, member
/// list, code files (oldest first) and the 50 most recent chat messages
/// (newest first).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room: Room,
    pub members: Vec<RoomMember>,
    pub code_files: Vec<CodeFile>,
    pub chat_messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFile {
    pub id: Uuid,
    pub room_id: Uuid,
    pub name: String,
    pub language: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOperation {
    Insert,
    Delete,
    Replace,
}

impl EditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditOperation::Insert => "insert",
            EditOperation::Delete => "delete",
            EditOperation::Replace => "replace",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(EditOperation::Insert),
            "delete" => Some(EditOperation::Delete),
            "replace" => Some(EditOperation::Replace),
            _ => None,
        }
    }
}

/// Append-only audit log entry for one file mutation. Never updated after
/// creation; live file content is kept on [`CodeFile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEdit {
    pub id: Uuid,
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub operation: EditOperation,
    pub position: i64,
    pub content: Option<String>,
    pub length: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    CodeSnippet,
    FileShare,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::CodeSnippet => "CODE_SNIPPET",
            MessageType::FileShare => "FILE_SHARE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(MessageType::Text),
            "CODE_SNIPPET" => Some(MessageType::CodeSnippet),
            "FILE_SHARE" => Some(MessageType::FileShare),
            _ => None,
        }
    }
}

/// Short preview of the message a chat message replies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: Uuid,
    pub content: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub user: PublicUser,
    pub reply_to: Option<ReplyPreview>,
    pub created_at: DateTime<Utc>,
}

/// Durable mirror of one in-memory connection-to-room binding, kept for
/// external presence queries. Best-effort; the registry stays authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub conn_id: Uuid,
    pub user_id: Uuid,
    pub room_id: Option<Uuid>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}
