//! Chat operations shared by the WebSocket protocol and the REST handlers.

use futures_util::future::join_all;
use serde::Deserialize;
use std::sync::Arc;

use crate::collab::{ChatMessage, Membership, MessageKind, MessageRepository, NewMessage};
use crate::error::ChatError;
use crate::hub::events::preview;
use crate::hub::{Hub, OutboundEvent};

/// Maximum message content length (chars).
pub const MAX_CONTENT_LENGTH: usize = 4000;
/// Notification previews are cut to this many chars.
const PREVIEW_LENGTH: usize = 100;

/// A message as submitted by a client, before it is persisted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
}

impl MessageDraft {
    pub fn text(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Self::default()
        }
    }

    /// Trim and check the draft. Text messages need content; attachments
    /// need a file url and may have an empty caption.
    pub fn validate(mut self) -> Result<Self, ChatError> {
        self.content = self.content.trim().to_string();
        self.file_url = self.file_url.filter(|url| !url.trim().is_empty());

        let len = self.content.chars().count();
        if len > MAX_CONTENT_LENGTH {
            return Err(ChatError::ContentTooLong(MAX_CONTENT_LENGTH));
        }
        match self.message_type {
            MessageKind::Text if self.content.is_empty() => Err(ChatError::EmptyContent),
            MessageKind::Image | MessageKind::File if self.file_url.is_none() => {
                Err(ChatError::MissingFileUrl)
            }
            _ => Ok(self),
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    hub: Arc<Hub>,
    membership: Arc<dyn Membership>,
    messages: Arc<dyn MessageRepository>,
}

impl ChatService {
    pub fn new(
        hub: Arc<Hub>,
        membership: Arc<dyn Membership>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            hub,
            membership,
            messages,
        }
    }

    pub async fn ensure_participant(&self, chat_id: &str, user_id: &str) -> Result<(), ChatError> {
        if self.membership.is_participant(chat_id, user_id).await? {
            Ok(())
        } else {
            Err(ChatError::NotParticipant)
        }
    }

    /// Persist a message, publish it to the room on every instance, then
    /// notify the other participants' presence connections in the background.
    pub async fn send_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        sender_name: &str,
        draft: MessageDraft,
    ) -> Result<ChatMessage, ChatError> {
        let draft = draft.validate()?;

        let message = self
            .messages
            .create_message(NewMessage {
                chat_id: chat_id.to_string(),
                sender_id: sender_id.to_string(),
                sender_name: sender_name.to_string(),
                content: draft.content,
                message_type: draft.message_type,
                file_url: draft.file_url,
                file_name: draft.file_name,
                file_size: draft.file_size,
            })
            .await?;

        self.hub
            .publish_room(
                chat_id,
                &OutboundEvent::MessageCreated {
                    room_id: chat_id.to_string(),
                    message: message.clone(),
                },
            )
            .await?;

        tracing::debug!(chat_id = %chat_id, message_id = %message.id, "Message published");

        tokio::spawn(notify_participants(
            self.hub.clone(),
            self.membership.clone(),
            message.clone(),
        ));

        Ok(message)
    }

    /// Broadcast a typing indicator to the room's local connections.
    pub fn typing(&self, chat_id: &str, user_id: &str, user_name: &str, is_typing: bool) -> usize {
        self.hub.broadcast_room(
            chat_id,
            &OutboundEvent::TypingChanged {
                room_id: chat_id.to_string(),
                user_id: user_id.to_string(),
                user_name: user_name.to_string(),
                is_typing,
            },
        )
    }

    /// Record a read receipt and broadcast it to the room. The message must
    /// belong to `chat_id`.
    pub async fn mark_read(&self, chat_id: &str, message_id: &str, user_id: &str) -> Result<usize, ChatError> {
        self.messages.mark_as_read(chat_id, message_id, user_id).await?;
        Ok(self.hub.broadcast_room(
            chat_id,
            &OutboundEvent::MessageRead {
                room_id: chat_id.to_string(),
                message_id: message_id.to_string(),
                user_id: user_id.to_string(),
            },
        ))
    }
}

fn notification_preview(message: &ChatMessage) -> String {
    if !message.content.is_empty() {
        return preview(&message.content, PREVIEW_LENGTH);
    }
    match message.message_type {
        MessageKind::Image => "[image]".to_string(),
        MessageKind::File => message
            .file_name
            .as_ref()
            .map(|name| format!("[file] {name}"))
            .unwrap_or_else(|| "[file]".to_string()),
        MessageKind::Text => String::new(),
    }
}

async fn notify_participants(hub: Arc<Hub>, membership: Arc<dyn Membership>, message: ChatMessage) {
    let participants = match membership.participants(&message.chat_id).await {
        Ok(participants) => participants,
        Err(e) => {
            tracing::warn!(
                chat_id = %message.chat_id,
                message_id = %message.id,
                "Participant lookup failed, skipping notifications: {}",
                e
            );
            return;
        }
    };

    let event = OutboundEvent::NewMessageNotification {
        room_id: message.chat_id.clone(),
        message_id: message.id.clone(),
        sender_id: message.sender_id.clone(),
        sender_name: message.sender_name.clone(),
        preview: notification_preview(&message),
    };

    // Concurrent: a stalled participant must not delay the others.
    let pushes = participants
        .iter()
        .filter(|id| **id != message.sender_id)
        .map(|user_id| hub.push_to_user(user_id, &event));
    let delivered: usize = join_all(pushes).await.into_iter().sum();
    tracing::debug!(chat_id = %message.chat_id, message_id = %message.id, delivered, "Notifications pushed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_validation() {
        assert!(matches!(
            MessageDraft::text("   ").validate(),
            Err(ChatError::EmptyContent)
        ));
        assert!(matches!(
            MessageDraft::text(&"x".repeat(MAX_CONTENT_LENGTH + 1)).validate(),
            Err(ChatError::ContentTooLong(_))
        ));
        assert_eq!(MessageDraft::text(" hi ").validate().unwrap().content, "hi");

        let image = MessageDraft {
            message_type: MessageKind::Image,
            ..MessageDraft::default()
        };
        assert!(matches!(image.clone().validate(), Err(ChatError::MissingFileUrl)));

        let image = MessageDraft {
            file_url: Some("https://cdn/x.png".into()),
            ..image
        };
        assert!(image.validate().is_ok(), "attachments may have no caption");
    }

    #[tokio::test]
    async fn test_message_reaches_room_and_notifies_others() {
        use crate::bridge::MemoryPubSub;
        use crate::chat::store::ChatStore;
        use crate::config::HubConfig;
        use crate::hub::{ConnectionScope, Frame};
        use std::time::Duration;
        use tokio::sync::mpsc;

        let hub = Hub::new(HubConfig::default(), Arc::new(MemoryPubSub::new(64)), "chat");
        let store = Arc::new(ChatStore::new(crate::db::init_memory_db()));
        let chat = store
            .create_chat(None, "a", vec!["b".into(), "c".into(), "d".into()])
            .await
            .unwrap();
        let service = ChatService::new(hub.clone(), store.clone(), store.clone());

        let room = ConnectionScope::Room(chat.id.clone());
        let (a_room, mut a_rx) = hub.open_connection("a", "A", room.clone());
        let (b_room, mut b_rx) = hub.open_connection("b", "B", room);
        let (a_global, mut a_global_rx) = hub.open_connection("a", "A", ConnectionScope::Presence);
        let (c_global, mut c_rx) = hub.open_connection("c", "C", ConnectionScope::Presence);
        let (d_global, mut d_rx) = hub.open_connection("d", "D", ConnectionScope::Presence);
        let mut tasks = Vec::new();
        for conn in [&a_room, &b_room, &a_global, &c_global, &d_global] {
            tasks.extend(hub.admit(conn).await.unwrap());
        }

        let kinds = |rx: &mut mpsc::Receiver<Frame>| {
            let mut out = Vec::new();
            while let Ok(frame) = rx.try_recv() {
                let json: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
                out.push(json["type"].as_str().unwrap_or("MESSAGE").to_string());
            }
            out
        };
        for rx in [&mut a_rx, &mut b_rx, &mut a_global_rx, &mut c_rx, &mut d_rx] {
            kinds(rx);
        }

        let sent = service
            .send_message(&chat.id, "a", "A", MessageDraft::text("hello"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let page = store.list_messages(&chat.id, None, 10).await.unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].id, sent.id);

        assert_eq!(kinds(&mut a_rx), vec!["MESSAGE"]);
        assert_eq!(kinds(&mut b_rx), vec!["MESSAGE"]);
        assert_eq!(kinds(&mut c_rx), vec!["NEW_MESSAGE_NOTIFICATION"]);
        assert_eq!(kinds(&mut d_rx), vec!["NEW_MESSAGE_NOTIFICATION"]);
        assert!(kinds(&mut a_global_rx).is_empty(), "sender is never notified");

        for task in tasks {
            task.abort();
        }
    }

    #[tokio::test]
    async fn test_stalled_participant_does_not_delay_notifications() {
        use crate::bridge::MemoryPubSub;
        use crate::chat::store::ChatStore;
        use crate::config::HubConfig;
        use crate::hub::{ConnectionScope, Frame};
        use std::time::{Duration, Instant};

        let hub = Hub::new(
            HubConfig {
                outbound_buffer: 8,
                push_deadline_ms: 800,
                ..HubConfig::default()
            },
            Arc::new(MemoryPubSub::new(64)),
            "chat",
        );
        let store = Arc::new(ChatStore::new(crate::db::init_memory_db()));
        let chat = store
            .create_chat(None, "a", vec!["c".into(), "d".into()])
            .await
            .unwrap();
        let service = ChatService::new(hub.clone(), store.clone(), store.clone());

        // c is listed before d and never drains its queue.
        let (c_global, _c_rx) = hub.open_connection("c", "C", ConnectionScope::Presence);
        hub.admit(&c_global).await.unwrap();
        let (d_global, mut d_rx) = hub.open_connection("d", "D", ConnectionScope::Presence);
        hub.admit(&d_global).await.unwrap();
        while c_global.try_enqueue(Frame::from("backlog")).is_ok() {}
        while d_rx.try_recv().is_ok() {}

        let started = Instant::now();
        service
            .send_message(&chat.id, "a", "A", MessageDraft::text("hi"))
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), d_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(frame.as_str()).unwrap();
        assert_eq!(json["type"], "NEW_MESSAGE_NOTIFICATION");
        assert!(
            started.elapsed() < Duration::from_millis(400),
            "d waited on c: {:?}",
            started.elapsed()
        );
        assert!(!c_global.is_evicted(), "targeted pushes never evict");
    }

    #[tokio::test]
    async fn test_read_receipt_for_message_of_other_chat_is_rejected() {
        use crate::bridge::MemoryPubSub;
        use crate::chat::store::ChatStore;
        use crate::config::HubConfig;
        use crate::error::CollabError;
        use crate::hub::ConnectionScope;

        let hub = Hub::new(HubConfig::default(), Arc::new(MemoryPubSub::new(64)), "chat");
        let store = Arc::new(ChatStore::new(crate::db::init_memory_db()));
        let private = store.create_chat(None, "a", vec!["c".into()]).await.unwrap();
        let other = store.create_chat(None, "b", vec!["a".into()]).await.unwrap();
        let service = ChatService::new(hub.clone(), store.clone(), store.clone());

        let secret = service
            .send_message(&private.id, "a", "A", MessageDraft::text("psst"))
            .await
            .unwrap();

        let (b_room, mut b_rx) = hub.open_connection("b", "B", ConnectionScope::Room(other.id.clone()));
        let forwarder = hub.admit(&b_room).await.unwrap();
        while b_rx.try_recv().is_ok() {}

        let result = service.mark_read(&other.id, &secret.id, "b").await;
        assert!(matches!(result, Err(ChatError::Collab(CollabError::NotFound))));
        assert!(b_rx.try_recv().is_err(), "no receipt is broadcast");

        // The same receipt in the right room goes through.
        assert_eq!(service.mark_read(&private.id, &secret.id, "c").await.unwrap(), 0);

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
    }

    #[test]
    fn test_preview_falls_back_for_attachments() {
        let message = ChatMessage {
            id: "m1".into(),
            chat_id: "c1".into(),
            sender_id: "u1".into(),
            sender_name: "Ann".into(),
            content: String::new(),
            message_type: MessageKind::File,
            file_url: Some("s3://f".into()),
            file_name: Some("plan.pdf".into()),
            file_size: Some(10),
            created_at: chrono::Utc::now(),
        };
        assert_eq!(notification_preview(&message), "[file] plan.pdf");
    }
}
