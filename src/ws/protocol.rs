//! Inbound frame dispatch for room connections.

use crate::chat::service::MessageDraft;
use crate::error::ChatError;
use crate::hub::events::error_frame;
use crate::hub::{ConnectionHandle, Frame, InboundFrame};
use crate::state::AppState;

/// Decode one text frame and dispatch it. Failures are logged and answered
/// with an `ERROR` frame to this connection only.
pub async fn handle_text_message(text: &str, conn: &ConnectionHandle, state: &AppState) {
    let frame = match InboundFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                user_id = %conn.user_id(),
                error = %e,
                "Failed to decode inbound frame"
            );
            reply(conn, error_frame("Invalid message format"));
            return;
        }
    };

    let Some(room_id) = conn.room_id() else {
        tracing::debug!(user_id = %conn.user_id(), "Frame on presence stream ignored");
        return;
    };

    match frame {
        InboundFrame::Message {
            content,
            message_type,
            file_url,
            file_name,
            file_size,
        } => {
            let draft = MessageDraft {
                content,
                message_type,
                file_url,
                file_name,
                file_size,
            };
            if let Err(e) = state
                .chat
                .send_message(room_id, conn.user_id(), conn.display_name(), draft)
                .await
            {
                report(conn, room_id, "send message", e);
            }
        }
        InboundFrame::TypingStart => {
            state
                .chat
                .typing(room_id, conn.user_id(), conn.display_name(), true);
        }
        InboundFrame::TypingStop => {
            state
                .chat
                .typing(room_id, conn.user_id(), conn.display_name(), false);
        }
        InboundFrame::ReadMessage { message_id } => {
            if let Err(e) = state.chat.mark_read(room_id, &message_id, conn.user_id()).await {
                report(conn, room_id, "mark message read", e);
            }
        }
    }
}

fn report(conn: &ConnectionHandle, room_id: &str, action: &str, err: ChatError) {
    let message = match &err {
        ChatError::Collab(_) | ChatError::Bridge(_) => {
            tracing::error!(
                user_id = %conn.user_id(),
                room_id = %room_id,
                "Failed to {}: {}",
                action,
                err
            );
            format!("Failed to {action}")
        }
        _ => {
            tracing::debug!(user_id = %conn.user_id(), room_id = %room_id, "Rejected: {}", err);
            err.to_string()
        }
    };
    reply(conn, error_frame(&message));
}

fn reply(conn: &ConnectionHandle, frame: Frame) {
    if let Err(reason) = conn.try_enqueue(frame) {
        tracing::debug!(conn_id = %conn.id(), ?reason, "Could not queue error frame");
    }
}
