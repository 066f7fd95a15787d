//! REST endpoint for creating chats.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::auth::middleware::AuthUser;
use crate::chat::store::ChatSummary;
use crate::state::AppState;

/// Upper bound on participants named in one request.
const MAX_PARTICIPANTS: usize = 256;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<String>,
}

/// POST /api/chats
/// The caller is always added as a participant.
pub async fn create_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<ChatSummary>), StatusCode> {
    if body.participant_ids.len() > MAX_PARTICIPANTS {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let chat = state
        .store
        .create_chat(body.name, &user.user_id, body.participant_ids)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user.user_id, "Failed to create chat: {}", e);
            e.status()
        })?;

    Ok((StatusCode::CREATED, Json(chat)))
}
