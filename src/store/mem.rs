//! In-memory [`Store`] used by the coordination-layer tests. Mirrors the
//! business-rule behavior of [`super::pg::PgStore`] without a database, and
//! can inject durable-write failures on demand.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use async_trait::async_trait;

use crate::models::entity::{
    ChatMessage, CodeEdit, CodeFile, MemberRole, Membership, PublicUser, ReplyPreview, Room,
    RoomMember, RoomSnapshot, SessionRecord, User,
};
use crate::store::{NewChatMessage, NewCodeEdit, NewRoom, Store, StoreError};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    rooms: HashMap<Uuid, Room>,
    memberships: Vec<Membership>,
    files: HashMap<Uuid, CodeFile>,
    edits: Vec<CodeEdit>,
    messages: Vec<ChatMessage>,
    sessions: HashMap<Uuid, SessionRecord>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
    fail_sessions: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, username: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            avatar: None,
            is_online: false,
            last_seen: Utc::now(),
        };
        self.inner
            .lock()
            .unwrap()
            .users
            .insert(user.id, user.clone());
        user
    }

    /// When set, every durable write fails with a database error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// When set, only session-record mirror writes fail.
    pub fn fail_sessions(&self, fail: bool) {
        self.fail_sessions.store(fail, Ordering::SeqCst);
    }

    pub fn session_record(&self, conn_id: Uuid) -> Option<SessionRecord> {
        self.inner.lock().unwrap().sessions.get(&conn_id).cloned()
    }

    pub fn edit_count(&self) -> usize {
        self.inner.lock().unwrap().edits.len()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn user_is_online(&self, user_id: Uuid) -> Option<bool> {
        self.inner
            .lock()
            .unwrap()
            .users
            .get(&user_id)
            .map(|u| u.is_online)
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected write failure".to_string()));
        }
        Ok(())
    }

    fn check_session_write(&self) -> Result<(), StoreError> {
        self.check_write()?;
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(StoreError::Database(
                "injected session-record failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_room(&self, owner_id: Uuid, room: NewRoom) -> Result<Room, StoreError> {
        self.check_write()?;
        let now = Utc::now();
        let created = Room {
            id: Uuid::new_v4(),
            name: room.name,
            description: room.description,
            is_private: room.is_private,
            max_members: room.max_members,
            is_active: true,
            owner_id,
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.rooms.insert(created.id, created.clone());
        inner.memberships.push(Membership {
            user_id: owner_id,
            room_id: created.id,
            role: MemberRole::Owner,
            joined_at: now,
        });
        Ok(created)
    }

    async fn get_room_snapshot(&self, room_id: Uuid) -> Result<Option<RoomSnapshot>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let Some(room) = inner.rooms.get(&room_id).cloned() else {
            return Ok(None);
        };
        let members = inner
            .memberships
            .iter()
            .filter(|m| m.room_id == room_id)
            .filter_map(|m| {
                inner.users.get(&m.user_id).map(|u| RoomMember {
                    user: PublicUser::from(u),
                    role: m.role,
                    joined_at: m.joined_at,
                })
            })
            .collect();
        let mut code_files: Vec<CodeFile> = inner
            .files
            .values()
            .filter(|f| f.room_id == room_id)
            .cloned()
            .collect();
        code_files.sort_by_key(|f| f.created_at);
        let mut chat_messages: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        chat_messages.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        chat_messages.truncate(50);
        Ok(Some(RoomSnapshot {
            room,
            members,
            code_files,
            chat_messages,
        }))
    }

    async fn find_membership(
        &self,
        user_id: Uuid,
        room_id: Uuid,
    ) -> Result<Option<Membership>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .memberships
            .iter()
            .find(|m| m.user_id == user_id && m.room_id == room_id)
            .cloned())
    }

    async fn count_members(&self, room_id: Uuid) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .memberships
            .iter()
            .filter(|m| m.room_id == room_id)
            .count() as i64)
    }

    async fn create_membership(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.lock().unwrap().memberships.push(Membership {
            user_id,
            room_id,
            role,
            joined_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_membership(&self, user_id: Uuid, room_id: Uuid) -> Result<(), StoreError> {
        self.check_write()?;
        let mut inner = self.inner.lock().unwrap();
        let Some(pos) = inner
            .memberships
            .iter()
            .position(|m| m.user_id == user_id && m.room_id == room_id)
        else {
            return Err(StoreError::NotFound("membership"));
        };
        if inner.memberships[pos].role == MemberRole::Owner {
            return Err(StoreError::OwnerImmutable);
        }
        inner.memberships.remove(pos);
        Ok(())
    }

    async fn update_membership_role(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        if role == MemberRole::Owner {
            return Err(StoreError::OwnerImmutable);
        }
        let mut inner = self.inner.lock().unwrap();
        let Some(membership) = inner
            .memberships
            .iter_mut()
            .find(|m| m.user_id == user_id && m.room_id == room_id)
        else {
            return Err(StoreError::NotFound("membership"));
        };
        if membership.role == MemberRole::Owner {
            return Err(StoreError::OwnerImmutable);
        }
        membership.role = role;
        Ok(())
    }

    async fn append_code_edit(&self, edit: NewCodeEdit) -> Result<CodeEdit, StoreError> {
        self.check_write()?;
        let created = CodeEdit {
            id: Uuid::new_v4(),
            file_id: edit.file_id,
            user_id: edit.user_id,
            operation: edit.operation,
            position: edit.position,
            content: edit.content,
            length: edit.length,
            timestamp: Utc::now(),
        };
        self.inner.lock().unwrap().edits.push(created.clone());
        Ok(created)
    }

    async fn create_chat_message(&self, msg: NewChatMessage) -> Result<ChatMessage, StoreError> {
        self.check_write()?;
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .get(&msg.user_id)
            .map(PublicUser::from)
            .ok_or(StoreError::NotFound("user"))?;
        let reply_to = msg.reply_to_id.and_then(|id| {
            inner.messages.iter().find(|m| m.id == id).map(|m| ReplyPreview {
                id: m.id,
                content: m.content.clone(),
                username: m.user.username.clone(),
            })
        });
        let created = ChatMessage {
            id: Uuid::new_v4(),
            room_id: msg.room_id,
            content: msg.content,
            message_type: msg.message_type,
            user,
            reply_to,
            created_at: Utc::now(),
        };
        inner.messages.push(created.clone());
        Ok(created)
    }

    async fn create_code_file(
        &self,
        room_id: Uuid,
        name: &str,
        language: &str,
    ) -> Result<CodeFile, StoreError> {
        self.check_write()?;
        let now = Utc::now();
        let file = CodeFile {
            id: Uuid::new_v4(),
            room_id,
            name: name.to_string(),
            language: language.to_string(),
            content: String::new(),
            created_at: now,
            updated_at: now,
        };
        self.inner.lock().unwrap().files.insert(file.id, file.clone());
        Ok(file)
    }

    async fn delete_code_file(&self, file_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        self.check_write()?;
        let mut inner = self.inner.lock().unwrap();
        let Some(file) = inner.files.get(&file_id) else {
            return Err(StoreError::NotFound("file"));
        };
        let room_id = file.room_id;
        if !inner
            .memberships
            .iter()
            .any(|m| m.room_id == room_id && m.user_id == user_id)
        {
            return Err(StoreError::Forbidden);
        }
        inner.files.remove(&file_id);
        inner.edits.retain(|e| e.file_id != file_id);
        Ok(())
    }

    async fn rename_code_file(
        &self,
        file_id: Uuid,
        new_name: &str,
        user_id: Uuid,
    ) -> Result<CodeFile, StoreError> {
        self.check_write()?;
        let mut inner = self.inner.lock().unwrap();
        let Some(room_id) = inner.files.get(&file_id).map(|f| f.room_id) else {
            return Err(StoreError::NotFound("file"));
        };
        if !inner
            .memberships
            .iter()
            .any(|m| m.room_id == room_id && m.user_id == user_id)
        {
            return Err(StoreError::Forbidden);
        }
        let file = inner.files.get_mut(&file_id).expect("checked above");
        file.name = new_name.to_string();
        file.updated_at = Utc::now();
        Ok(file.clone())
    }

    async fn upsert_session_record(
        &self,
        conn_id: Uuid,
        user_id: Uuid,
        room_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        self.check_session_write()?;
        self.inner.lock().unwrap().sessions.insert(
            conn_id,
            SessionRecord {
                conn_id,
                user_id,
                room_id,
                is_active: true,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete_session_record(&self, conn_id: Uuid) -> Result<(), StoreError> {
        self.check_session_write()?;
        self.inner.lock().unwrap().sessions.remove(&conn_id);
        Ok(())
    }

    async fn set_user_online(&self, user_id: Uuid, online: bool) -> Result<(), StoreError> {
        self.check_write()?;
        let mut inner = self.inner.lock().unwrap();
        let Some(user) = inner.users.get_mut(&user_id) else {
            return Err(StoreError::NotFound("user"));
        };
        user.is_online = online;
        user.last_seen = Utc::now();
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().unwrap().users.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn owner_membership_cannot_be_deleted() {
        let store = MemStore::new();
        let owner = store.add_user("alice");
        let room = store
            .create_room(
                owner.id,
                NewRoom {
                    name: "demo".to_string(),
                    description: String::new(),
                    is_private: false,
                    max_members: 10,
                },
            )
            .await
            .unwrap();

        let err = store.delete_membership(owner.id, room.id).await.unwrap_err();
        assert!(matches!(err, StoreError::OwnerImmutable));
        assert!(store
            .find_membership(owner.id, room.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn owner_membership_cannot_be_re_roled() {
        let store = MemStore::new();
        let owner = store.add_user("alice");
        let member = store.add_user("bob");
        let room = store
            .create_room(
                owner.id,
                NewRoom {
                    name: "demo".to_string(),
                    description: String::new(),
                    is_private: false,
                    max_members: 10,
                },
            )
            .await
            .unwrap();
        store
            .create_membership(member.id, room.id, MemberRole::Member)
            .await
            .unwrap();

        // Owner can neither be demoted nor can a member be promoted to owner.
        let err = store
            .update_membership_role(owner.id, room.id, MemberRole::Viewer)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OwnerImmutable));
        let err = store
            .update_membership_role(member.id, room.id, MemberRole::Owner)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OwnerImmutable));

        store
            .update_membership_role(member.id, room.id, MemberRole::Viewer)
            .await
            .unwrap();
        let membership = store
            .find_membership(member.id, room.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(membership.role, MemberRole::Viewer);
    }
}
