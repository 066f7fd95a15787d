//! Interfaces to the collaborators the hub depends on but does not own:
//! identity (token validation + profile), chat membership and the message
//! repository. `http` talks to the identity service; the SQLite adapter for the
//! other two lives in `crate::chat::store`.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, CollabError};

pub use http::HttpIdentityClient;

/// Kind of a chat message. Attachments carry a file url.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
            Self::File => "FILE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(Self::Text),
            "IMAGE" => Some(Self::Image),
            "FILE" => Some(Self::File),
            _ => None,
        }
    }
}

/// A persisted chat message as returned by the repository.
/// Serialized verbatim onto the room topic when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Input to `MessageRepository::create_message`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
}

/// One page of message history, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
}

/// Token validation and profile lookup.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the user id the token belongs to.
    async fn validate_token(&self, token: &str) -> Result<String, AuthError>;

    async fn display_name(&self, user_id: &str) -> Result<String, CollabError>;
}

/// Chat membership lookup.
#[async_trait]
pub trait Membership: Send + Sync {
    async fn is_participant(&self, chat_id: &str, user_id: &str) -> Result<bool, CollabError>;

    async fn participants(&self, chat_id: &str) -> Result<Vec<String>, CollabError>;
}

/// Create / read / soft-delete access to chat messages.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create_message(&self, message: NewMessage) -> Result<ChatMessage, CollabError>;

    /// Records that `user_id` has read `message_id`, which must be a live
    /// message of `chat_id`. Repeated calls are no-ops.
    async fn mark_as_read(&self, chat_id: &str, message_id: &str, user_id: &str)
        -> Result<(), CollabError>;

    /// Messages older than `before` (a message id), newest first.
    async fn list_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage, CollabError>;

    /// Soft-deletes a message. Only its sender may delete it.
    async fn delete_message(&self, message_id: &str, user_id: &str) -> Result<(), CollabError>;
}
