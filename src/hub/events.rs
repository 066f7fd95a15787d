//! Wire formats: inbound client frames and outbound event envelopes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::connection::Frame;
use crate::collab::{ChatMessage, MessageKind};

/// Frames a client may send on a room connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundFrame {
    #[serde(rename_all = "camelCase")]
    Message {
        content: String,
        #[serde(default)]
        message_type: MessageKind,
        #[serde(default)]
        file_url: Option<String>,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        file_size: Option<i64>,
    },
    TypingStart,
    TypingStop,
    #[serde(rename_all = "camelCase")]
    ReadMessage { message_id: String },
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// An event delivered to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    UserStatusChanged {
        user_id: String,
        online: bool,
    },
    TypingChanged {
        room_id: String,
        user_id: String,
        user_name: String,
        is_typing: bool,
    },
    /// Serialized as the raw persisted message.
    MessageCreated {
        room_id: String,
        message: ChatMessage,
    },
    MessageRead {
        room_id: String,
        message_id: String,
        user_id: String,
    },
    NewMessageNotification {
        room_id: String,
        message_id: String,
        sender_id: String,
        sender_name: String,
        preview: String,
    },
}

/// Common server -> client envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl<'a> Envelope<'a> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            chat_id: None,
            user_id: None,
            message_id: None,
            timestamp: Some(Utc::now().timestamp_millis()),
            payload: None,
        }
    }
}

impl OutboundEvent {
    /// Envelope `type` of this event. Created messages have none.
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            Self::UserStatusChanged { .. } => Some("USER_STATUS"),
            Self::TypingChanged { is_typing: true, .. } => Some("USER_TYPING"),
            Self::TypingChanged { is_typing: false, .. } => Some("USER_TYPING_STOP"),
            Self::MessageCreated { .. } => None,
            Self::MessageRead { .. } => Some("MESSAGE_READ"),
            Self::NewMessageNotification { .. } => Some("NEW_MESSAGE_NOTIFICATION"),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let envelope = match self {
            Self::MessageCreated { message, .. } => return serde_json::to_string(message),
            Self::UserStatusChanged { user_id, online } => Envelope {
                user_id: Some(user_id),
                payload: Some(json!({ "status": if *online { "ONLINE" } else { "OFFLINE" } })),
                ..Envelope::new("USER_STATUS")
            },
            Self::TypingChanged {
                room_id,
                user_id,
                user_name,
                is_typing,
            } => Envelope {
                chat_id: Some(room_id),
                user_id: Some(user_id),
                payload: Some(json!({ "userName": user_name })),
                ..Envelope::new(if *is_typing { "USER_TYPING" } else { "USER_TYPING_STOP" })
            },
            Self::MessageRead {
                room_id,
                message_id,
                user_id,
            } => Envelope {
                chat_id: Some(room_id),
                user_id: Some(user_id),
                message_id: Some(message_id),
                ..Envelope::new("MESSAGE_READ")
            },
            Self::NewMessageNotification {
                room_id,
                message_id,
                sender_id,
                sender_name,
                preview,
            } => Envelope {
                chat_id: Some(room_id),
                user_id: Some(sender_id),
                message_id: Some(message_id),
                payload: Some(json!({ "senderName": sender_name, "preview": preview })),
                ..Envelope::new("NEW_MESSAGE_NOTIFICATION")
            },
        };
        serde_json::to_string(&envelope)
    }

    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        self.to_json().map(Frame::from)
    }
}

/// Error frame sent only to the connection whose input was rejected.
pub fn error_frame(message: &str) -> Frame {
    let envelope = Envelope {
        payload: Some(json!({ "message": message })),
        ..Envelope::new("ERROR")
    };
    serde_json::to_string(&envelope)
        .map(Frame::from)
        .unwrap_or_else(|_| Frame::from(r#"{"type":"ERROR"}"#))
}

/// First `max_chars` characters of a message body for notifications.
pub fn preview(content: &str, max_chars: usize) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
