use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use async_trait::async_trait;

use crate::models::entity::{
    ChatMessage, CodeEdit, CodeFile, MemberRole, Membership, MessageType, PublicUser,
    ReplyPreview, Room, RoomMember, RoomSnapshot, User,
};
use crate::store::{NewChatMessage, NewCodeEdit, NewRoom, Store, StoreError};

/// PostgreSQL-backed persistence collaborator.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }
}

fn parse_role(s: &str) -> Result<MemberRole, StoreError> {
    MemberRole::parse(s).ok_or_else(|| StoreError::Database(format!("unknown member role '{s}'")))
}

fn parse_message_type(s: &str) -> Result<MessageType, StoreError> {
    MessageType::parse(s)
        .ok_or_else(|| StoreError::Database(format!("unknown message type '{s}'")))
}

fn room_from_row(row: &PgRow) -> Result<Room, StoreError> {
    Ok(Room {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        is_private: row.try_get("is_private")?,
        max_members: row.try_get("max_members")?,
        is_active: row.try_get("is_active")?,
        owner_id: row.try_get("owner_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn file_from_row(row: &PgRow) -> Result<CodeFile, StoreError> {
    Ok(CodeFile {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        name: row.try_get("name")?,
        language: row.try_get("language")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<ChatMessage, StoreError> {
    let message_type = parse_message_type(&row.try_get::<String, _>("type")?)?;
    let reply_to = match row.try_get::<Option<Uuid>, _>("reply_id")? {
        Some(id) => Some(ReplyPreview {
            id,
            content: row.try_get("reply_content")?,
            username: row.try_get("reply_username")?,
        }),
        None => None,
    };
    Ok(ChatMessage {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        content: row.try_get("content")?,
        message_type,
        user: PublicUser {
            id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            avatar: row.try_get("avatar")?,
        },
        reply_to,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn create_room(&self, owner_id: Uuid, room: NewRoom) -> Result<Room, StoreError> {
        let now = Utc::now();
        let room_id = Uuid::new_v4();

        // Room and owner membership must land together.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO rooms (id, name, description, is_private, max_members, is_active, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7, $7)
            "#,
        )
        .bind(room_id)
        .bind(&room.name)
        .bind(&room.description)
        .bind(room.is_private)
        .bind(room.max_members)
        .bind(owner_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO room_members (user_id, room_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(owner_id)
        .bind(room_id)
        .bind(MemberRole::Owner.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Room {
            id: room_id,
            name: room.name,
            description: room.description,
            is_private: room.is_private,
            max_members: room.max_members,
            is_active: true,
            owner_id,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_room_snapshot(&self, room_id: Uuid) -> Result<Option<RoomSnapshot>, StoreError> {
        let Some(room_row) = sqlx::query("SELECT * FROM rooms WHERE id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let room = room_from_row(&room_row)?;

        let member_rows = sqlx::query(
            r#"
            SELECT rm.role, rm.joined_at, u.id, u.username, u.avatar
            FROM room_members rm
            JOIN users u ON u.id = rm.user_id
            WHERE rm.room_id = $1
            ORDER BY rm.joined_at ASC
            "#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        let mut members = Vec::with_capacity(member_rows.len());
        for row in &member_rows {
            members.push(RoomMember {
                user: PublicUser {
                    id: row.try_get("id")?,
                    username: row.try_get("username")?,
                    avatar: row.try_get("avatar")?,
                },
                role: parse_role(&row.try_get::<String, _>("role")?)?,
                joined_at: row.try_get("joined_at")?,
            });
        }

        let file_rows = sqlx::query(
            "SELECT * FROM code_files WHERE room_id = $1 ORDER BY created_at ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        let mut code_files = Vec::with_capacity(file_rows.len());
        for row in &file_rows {
            code_files.push(file_from_row(row)?);
        }

        let message_rows = sqlx::query(
            r#"
            SELECT m.id, m.room_id, m.content, m.type, m.created_at,
                   u.id AS user_id, u.username, u.avatar,
                   r.id AS reply_id, r.content AS reply_content, ru.username AS reply_username
            FROM chat_messages m
            JOIN users u ON u.id = m.user_id
            LEFT JOIN chat_messages r ON r.id = m.reply_to_id
            LEFT JOIN users ru ON ru.id = r.user_id
            WHERE m.room_id = $1
            ORDER BY m.created_at DESC
            LIMIT 50
            "#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        let mut chat_messages = Vec::with_capacity(message_rows.len());
        for row in &message_rows {
            chat_messages.push(message_from_row(row)?);
        }

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
        let row = sqlx::query(
            "SELECT user_id, room_id, role, joined_at FROM room_members WHERE user_id = $1 AND room_id = $2",
        )
        .bind(user_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(Membership {
                user_id: row.try_get("user_id")?,
                room_id: row.try_get("room_id")?,
                role: parse_role(&row.try_get::<String, _>("role")?)?,
                joined_at: row.try_get("joined_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn count_members(&self, room_id: Uuid) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM room_members WHERE room_id = $1")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    async fn create_membership(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO room_members (user_id, room_id, role, joined_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(room_id)
        .bind(role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_membership(&self, user_id: Uuid, room_id: Uuid) -> Result<(), StoreError> {
        // The owner row is untouchable; check the role first, then delete.
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT role FROM room_members WHERE user_id = $1 AND room_id = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(room_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("membership"))?;
        if parse_role(&row.try_get::<String, _>("role")?)? == MemberRole::Owner {
            return Err(StoreError::OwnerImmutable);
        }
        sqlx::query("DELETE FROM room_members WHERE user_id = $1 AND room_id = $2")
            .bind(user_id)
            .bind(room_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_membership_role(
        &self,
        user_id: Uuid,
        room_id: Uuid,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        if role == MemberRole::Owner {
            return Err(StoreError::OwnerImmutable);
        }
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT role FROM room_members WHERE user_id = $1 AND room_id = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(room_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("membership"))?;
        if parse_role(&row.try_get::<String, _>("role")?)? == MemberRole::Owner {
            return Err(StoreError::OwnerImmutable);
        }
        sqlx::query("UPDATE room_members SET role = $3 WHERE user_id = $1 AND room_id = $2")
            .bind(user_id)
            .bind(room_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_code_edit(&self, edit: NewCodeEdit) -> Result<CodeEdit, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO code_edits (id, file_id, user_id, operation, position, content, length, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(edit.file_id)
        .bind(edit.user_id)
        .bind(edit.operation.as_str())
        .bind(edit.position)
        .bind(&edit.content)
        .bind(edit.length)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(CodeEdit {
            id,
            file_id: edit.file_id,
            user_id: edit.user_id,
            operation: edit.operation,
            position: edit.position,
            content: edit.content,
            length: edit.length,
            timestamp: now,
        })
    }

    async fn create_chat_message(&self, msg: NewChatMessage) -> Result<ChatMessage, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, room_id, user_id, content, type, reply_to_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(msg.room_id)
        .bind(msg.user_id)
        .bind(&msg.content)
        .bind(msg.message_type.as_str())
        .bind(msg.reply_to_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let user_row = sqlx::query("SELECT id, username, avatar FROM users WHERE id = $1")
            .bind(msg.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("user"))?;
        let user = PublicUser {
            id: user_row.try_get("id")?,
            username: user_row.try_get("username")?,
            avatar: user_row.try_get("avatar")?,
        };

        let reply_to = match msg.reply_to_id {
            Some(reply_id) => sqlx::query(
                r#"
                SELECT m.id, m.content, u.username
                FROM chat_messages m
                JOIN users u ON u.id = m.user_id
                WHERE m.id = $1
                "#,
            )
            .bind(reply_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| -> Result<ReplyPreview, StoreError> {
                Ok(ReplyPreview {
                    id: row.try_get("id")?,
                    content: row.try_get("content")?,
                    username: row.try_get("username")?,
                })
            })
            .transpose()?,
            None => None,
        };
        tx.commit().await?;

        Ok(ChatMessage {
            id,
            room_id: msg.room_id,
            content: msg.content,
            message_type: msg.message_type,
            user,
            reply_to,
            created_at: now,
        })
    }

    async fn create_code_file(
        &self,
        room_id: Uuid,
        name: &str,
        language: &str,
    ) -> Result<CodeFile, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO code_files (id, room_id, name, language, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4, '', $5, $5)
            "#,
        )
        .bind(id)
        .bind(room_id)
        .bind(name)
        .bind(language)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(CodeFile {
            id,
            room_id,
            name: name.to_string(),
            language: language.to_string(),
            content: String::new(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn delete_code_file(&self, file_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT room_id FROM code_files WHERE id = $1")
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("file"))?;
        let room_id: Uuid = row.try_get("room_id")?;

        let member = sqlx::query(
            "SELECT 1 AS one FROM room_members WHERE room_id = $1 AND user_id = $2",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if member.is_none() {
            return Err(StoreError::Forbidden);
        }

        // Edits are owned by the file; drop them with it.
        sqlx::query("DELETE FROM code_edits WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM code_files WHERE id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rename_code_file(
        &self,
        file_id: Uuid,
        new_name: &str,
        user_id: Uuid,
    ) -> Result<CodeFile, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT room_id FROM code_files WHERE id = $1")
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("file"))?;
        let room_id: Uuid = row.try_get("room_id")?;

        let member = sqlx::query(
            "SELECT 1 AS one FROM room_members WHERE room_id = $1 AND user_id = $2",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if member.is_none() {
            return Err(StoreError::Forbidden);
        }

        let updated = sqlx::query(
            "UPDATE code_files SET name = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(file_id)
        .bind(new_name)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        file_from_row(&updated)
    }

    async fn upsert_session_record(
        &self,
        conn_id: Uuid,
        user_id: Uuid,
        room_id: Option<Uuid>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_sessions (socket_id, user_id, room_id, is_active, updated_at)
            VALUES ($1, $2, $3, TRUE, $4)
            ON CONFLICT (socket_id)
            DO UPDATE SET room_id = EXCLUDED.room_id, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(conn_id)
        .bind(user_id)
        .bind(room_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session_record(&self, conn_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM user_sessions WHERE socket_id = $1")
            .bind(conn_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_user_online(&self, user_id: Uuid, online: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET is_online = $2, last_seen = $3 WHERE id = $1")
            .bind(user_id)
            .bind(online)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, email, avatar, is_online, last_seen FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(User {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                email: row.try_get("email")?,
                avatar: row.try_get("avatar")?,
                is_online: row.try_get("is_online")?,
                last_seen: row.try_get("last_seen")?,
            })),
            None => Ok(None),
        }
    }
}
