//! SQLite adapter for chat membership and the message repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::collab::{ChatMessage, Membership, MessageKind, MessagePage, MessageRepository, NewMessage};
use crate::db::DbPool;
use crate::error::CollabError;

/// A chat with its participant list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_by: String,
    pub participant_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ChatStore {
    db: DbPool,
}

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, sender_name, content, message_type, \
     file_url, file_name, file_size, created_at";

impl ChatStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CollabError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CollabError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| CollabError::LockPoisoned)?;
            f(&conn)
        })
        .await?
    }

    /// Create a chat. The creator is always a participant; duplicate ids are
    /// collapsed.
    pub async fn create_chat(
        &self,
        name: Option<String>,
        creator: &str,
        participant_ids: Vec<String>,
    ) -> Result<ChatSummary, CollabError> {
        let mut members = vec![creator.to_string()];
        for id in participant_ids {
            let id = id.trim().to_string();
            if !id.is_empty() && !members.contains(&id) {
                members.push(id);
            }
        }

        let chat = ChatSummary {
            id: Uuid::now_v7().to_string(),
            name: name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            created_by: creator.to_string(),
            participant_ids: members,
            created_at: Utc::now(),
        };

        let row = chat.clone();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO chats (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![row.id, row.name, row.created_by, row.created_at],
            )?;
            for user_id in &row.participant_ids {
                tx.execute(
                    "INSERT INTO chat_participants (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                    params![row.id, user_id, row.created_at],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        tracing::info!(chat_id = %chat.id, participants = chat.participant_ids.len(), "Chat created");
        Ok(chat)
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let kind: String = row.get(5)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        message_type: MessageKind::parse(&kind).unwrap_or_default(),
        file_url: row.get(6)?,
        file_name: row.get(7)?,
        file_size: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[async_trait]
impl Membership for ChatStore {
    async fn is_participant(&self, chat_id: &str, user_id: &str) -> Result<bool, CollabError> {
        let (chat_id, user_id) = (chat_id.to_string(), user_id.to_string());
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn participants(&self, chat_id: &str) -> Result<Vec<String>, CollabError> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY joined_at, user_id",
            )?;
            let ids = stmt
                .query_map(params![chat_id], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
        .await
    }
}

#[async_trait]
impl MessageRepository for ChatStore {
    async fn create_message(&self, message: NewMessage) -> Result<ChatMessage, CollabError> {
        let stored = ChatMessage {
            id: Uuid::now_v7().to_string(),
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            content: message.content,
            message_type: message.message_type,
            file_url: message.file_url,
            file_name: message.file_name,
            file_size: message.file_size,
            created_at: Utc::now(),
        };

        let row = stored.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    row.id,
                    row.chat_id,
                    row.sender_id,
                    row.sender_name,
                    row.content,
                    row.message_type.as_str(),
                    row.file_url,
                    row.file_name,
                    row.file_size,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(stored)
    }

    async fn mark_as_read(
        &self,
        chat_id: &str,
        message_id: &str,
        user_id: &str,
    ) -> Result<(), CollabError> {
        let (chat_id, message_id, user_id) =
            (chat_id.to_string(), message_id.to_string(), user_id.to_string());
        self.with_conn(move |conn| {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1 AND chat_id = ?2 AND deleted_at IS NULL",
                    params![message_id, chat_id],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Err(CollabError::NotFound);
            }
            conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                params![message_id, user_id, Utc::now()],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage, CollabError> {
        let chat_id = chat_id.to_string();
        let before = before.map(str::to_string);
        let limit = limit.max(1);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1 AND deleted_at IS NULL AND (?2 IS NULL OR id < ?2)
                 ORDER BY id DESC
                 LIMIT ?3"
            ))?;
            let mut messages = stmt
                .query_map(params![chat_id, before, i64::from(limit) + 1], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let has_more = messages.len() > limit as usize;
            messages.truncate(limit as usize);
            Ok(MessagePage { messages, has_more })
        })
        .await
    }

    async fn delete_message(&self, message_id: &str, user_id: &str) -> Result<(), CollabError> {
        let (message_id, user_id) = (message_id.to_string(), user_id.to_string());
        self.with_conn(move |conn| {
            let sender: Option<String> = conn
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1 AND deleted_at IS NULL",
                    params![message_id],
                    |row| row.get(0),
                )
                .optional()?;
            match sender {
                None => Err(CollabError::NotFound),
                Some(sender) if sender != user_id => Err(CollabError::Forbidden),
                Some(_) => {
                    conn.execute(
                        "UPDATE messages SET deleted_at = ?2 WHERE id = ?1",
                        params![message_id, Utc::now()],
                    )?;
                    Ok(())
                }
            }
        })
        .await
    }
}
