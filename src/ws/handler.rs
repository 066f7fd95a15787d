use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::Deserialize;
use tokio::time::timeout;

use crate::auth::middleware::{authenticate, bearer_token};
use crate::hub::ConnectionScope;
use crate::state::AppState;
use crate::ws::actor;

/// Shown for users whose profile could not be loaded.
pub const UNKNOWN_USER: &str = "Unknown User";

/// Frames beyond this multiple of `max_frame_bytes` fail the transport
/// instead of being read and discarded.
const HARD_FRAME_LIMIT_FACTOR: usize = 16;

/// Query parameters for WebSocket connections.
/// Browsers cannot set headers on upgrade requests, so the token rides in
/// `?token=`; other clients may use `Authorization: Bearer`.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Authenticate the upgrade request. Rejections happen before the upgrade,
/// so no connection state exists for them.
async fn authenticate_upgrade(
    state: &AppState,
    params: &WsAuthQuery,
    headers: &HeaderMap,
) -> Result<String, StatusCode> {
    let token = params
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers));

    authenticate(state, token).await.map_err(|e| {
        tracing::warn!("WebSocket authentication failed: {}", e);
        e.status()
    })
}

/// Profile lookup with the handshake bound. Any failure yields the placeholder.
pub async fn resolve_display_name(state: &AppState, user_id: &str) -> String {
    let bound = state.hub.config().handshake_timeout();
    match timeout(bound, state.identity.display_name(user_id)).await {
        Ok(Ok(name)) => name,
        Ok(Err(e)) => {
            tracing::debug!(user_id = %user_id, "Profile lookup failed: {}", e);
            UNKNOWN_USER.to_string()
        }
        Err(_) => {
            tracing::warn!(user_id = %user_id, "Profile lookup timed out");
            UNKNOWN_USER.to_string()
        }
    }
}

fn configure(ws: WebSocketUpgrade, state: &AppState) -> WebSocketUpgrade {
    let max_frame = state.hub.config().max_frame_bytes;
    ws.max_message_size(max_frame.saturating_mul(HARD_FRAME_LIMIT_FACTOR))
}

/// GET /ws/chat/{room_id}?token=...
/// Room stream. 401 without a valid token, 403 for non-participants, 503
/// when a collaborator is unreachable.
pub async fn chat_upgrade(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let user_id = authenticate_upgrade(&state, &params, &headers).await?;

    let bound = state.hub.config().handshake_timeout();
    match timeout(bound, state.membership.is_participant(&room_id, &user_id)).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => {
            tracing::info!(user_id = %user_id, room_id = %room_id, "Not a participant, rejecting");
            return Err(StatusCode::FORBIDDEN);
        }
        Ok(Err(e)) => {
            tracing::error!(user_id = %user_id, room_id = %room_id, "Membership lookup failed: {}", e);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        Err(_) => {
            tracing::error!(user_id = %user_id, room_id = %room_id, "Membership lookup timed out");
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    let display_name = resolve_display_name(&state, &user_id).await;
    tracing::info!(user_id = %user_id, room_id = %room_id, "Room stream authorized");

    Ok(configure(ws, &state).on_upgrade(move |socket| {
        actor::run_connection(socket, state, user_id, display_name, ConnectionScope::Room(room_id))
    }))
}

/// GET /ws/presence?token=...
/// Global presence stream of a running client.
pub async fn presence_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let user_id = authenticate_upgrade(&state, &params, &headers).await?;
    let display_name = resolve_display_name(&state, &user_id).await;
    tracing::info!(user_id = %user_id, "Presence stream authorized");

    Ok(configure(ws, &state).on_upgrade(move |socket| {
        actor::run_connection(socket, state, user_id, display_name, ConnectionScope::Presence)
    }))
}
