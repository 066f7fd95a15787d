//! REST endpoints for message history, sending and deletion.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::AuthUser;
use crate::chat::service::MessageDraft;
use crate::collab::{ChatMessage, MessagePage};
use crate::error::ChatError;
use crate::state::AppState;

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Id of the oldest message already held by the client.
    pub before: Option<String>,
    pub limit: Option<u32>,
}

fn reject(user_id: &str, err: ChatError) -> StatusCode {
    match &err {
        ChatError::Collab(_) | ChatError::Bridge(_) => {
            tracing::error!(user_id = %user_id, "Chat request failed: {}", err)
        }
        _ => tracing::debug!(user_id = %user_id, "Chat request rejected: {}", err),
    }
    err.status()
}

/// GET /api/chats/{chat_id}/messages?before=&limit=
/// Newest first. Participants only.
pub async fn get_history(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePage>, StatusCode> {
    state
        .chat
        .ensure_participant(&chat_id, &user.user_id)
        .await
        .map_err(|e| reject(&user.user_id, e))?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let before = query.before.as_deref().filter(|b| !b.is_empty());

    let page = state
        .messages
        .list_messages(&chat_id, before, limit)
        .await
        .map_err(|e| reject(&user.user_id, e.into()))?;

    Ok(Json(page))
}

/// POST /api/chats/{chat_id}/messages
/// Same path as a `MESSAGE` frame on the room stream.
pub async fn create_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(chat_id): Path<String>,
    Json(draft): Json<MessageDraft>,
) -> Result<(StatusCode, Json<ChatMessage>), StatusCode> {
    state
        .chat
        .ensure_participant(&chat_id, &user.user_id)
        .await
        .map_err(|e| reject(&user.user_id, e))?;

    let sender_name = crate::ws::handler::resolve_display_name(&state, &user.user_id).await;
    let message = state
        .chat
        .send_message(&chat_id, &user.user_id, &sender_name, draft)
        .await
        .map_err(|e| reject(&user.user_id, e))?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// DELETE /api/messages/{message_id}
/// Soft delete. Only the author may delete.
pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state
        .messages
        .delete_message(&message_id, &user.user_id)
        .await
        .map_err(|e| reject(&user.user_id, e.into()))?;

    tracing::info!(user_id = %user.user_id, message_id = %message_id, "Message deleted");
    Ok(StatusCode::NO_CONTENT)
}
