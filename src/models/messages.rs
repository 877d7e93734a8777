use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::entity::{
    ChatMessage, CodeFile, EditOperation, MessageType, PublicUser, Room, RoomSnapshot,
};

/// Events received from clients over the WebSocket. The room id is implied
/// by the connection's current binding; only `join-room` names a room.
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "create-room", rename_all = "camelCase")]
    CreateRoom {
        name: String,
        description: Option<String>,
        is_private: Option<bool>,
        max_members: Option<i32>,
    },
    #[serde(rename = "join-room", rename_all = "camelCase")]
    JoinRoom { room_id: Uuid },
    #[serde(rename = "leave-room")]
    LeaveRoom,
    #[serde(rename = "code-change", rename_all = "camelCase")]
    CodeChange {
        file_id: Uuid,
        operation: EditOperation,
        position: i64,
        content: Option<String>,
        length: Option<i64>,
    },
    // The message kind travels as `messageType`: the envelope already uses
    // `type` as its tag.
    #[serde(rename = "send-message", rename_all = "camelCase")]
    SendMessage {
        content: String,
        message_type: Option<MessageType>,
        reply_to_id: Option<Uuid>,
    },
    #[serde(rename = "cursor-position", rename_all = "camelCase")]
    CursorPosition {
        position: Value,
        selection: Option<Value>,
    },
    #[serde(rename = "create-file", rename_all = "camelCase")]
    CreateFile {
        file_name: String,
        language: Option<String>,
    },
    #[serde(rename = "delete-file", rename_all = "camelCase")]
    DeleteFile { file_id: Uuid },
    #[serde(rename = "rename-file", rename_all = "camelCase")]
    RenameFile { file_id: Uuid, new_name: String },
}

/// Events sent to clients. Serialized with the event name in the `type` tag.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "room-created", rename_all = "camelCase")]
    RoomCreated { room: Room },
    #[serde(rename = "room-joined", rename_all = "camelCase")]
    RoomJoined {
        room: Box<RoomSnapshot>,
        active_users: Vec<PublicUser>,
    },
    #[serde(rename = "room-presence", rename_all = "camelCase")]
    RoomPresence { active_users: Vec<PublicUser> },
    #[serde(rename = "user-joined", rename_all = "camelCase")]
    UserJoined {
        user_id: Uuid,
        username: String,
        joined_at: DateTime<Utc>,
    },
    #[serde(rename = "user-left", rename_all = "camelCase")]
    UserLeft {
        user_id: Uuid,
        username: String,
        left_at: DateTime<Utc>,
    },
    #[serde(rename = "room-left", rename_all = "camelCase")]
    RoomLeft { room_id: Uuid },
    #[serde(rename = "code-updated", rename_all = "camelCase")]
    CodeUpdated {
        file_id: Uuid,
        operation: EditOperation,
        position: i64,
        content: Option<String>,
        length: Option<i64>,
        user_id: Uuid,
        username: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "new-message")]
    NewMessage { message: ChatMessage },
    #[serde(rename = "cursor-updated", rename_all = "camelCase")]
    CursorUpdated {
        user_id: Uuid,
        username: String,
        position: Value,
        selection: Option<Value>,
    },
    #[serde(rename = "file-created", rename_all = "camelCase")]
    FileCreated {
        file: CodeFile,
        created_by: PublicUser,
    },
    #[serde(rename = "file-deleted", rename_all = "camelCase")]
    FileDeleted {
        file_id: Uuid,
        deleted_by: PublicUser,
    },
    #[serde(rename = "file-renamed", rename_all = "camelCase")]
    FileRenamed {
        file: CodeFile,
        renamed_by: PublicUser,
    },
    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        kind: &'static str,
        message: String,
    },
}
