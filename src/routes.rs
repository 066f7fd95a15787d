use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::chat::{chats, messages, presence};
use crate::config::RateLimitConfig;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

async fn health() -> &'static str {
    "ok"
}

/// Build the full axum Router.
///
/// With `rate_limit` set, the WebSocket handshake routes are limited per peer
/// IP. The limiter reads `ConnectInfo<SocketAddr>`, so the router must be
/// served with `into_make_service_with_connect_info`.
pub fn build_router(state: AppState, rate_limit: Option<&RateLimitConfig>) -> Router {
    let mut ws_routes = Router::new()
        .route("/ws/chat/{room_id}", get(ws_handler::chat_upgrade))
        .route("/ws/presence", get(ws_handler::presence_upgrade));

    if let Some(limit) = rate_limit {
        match GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(limit.per_second.max(1))
            .burst_size(limit.burst_size.max(1))
            .finish()
        {
            Some(config) => {
                let config = Arc::new(config);
                let limiter = config.limiter().clone();
                // Periodically forget idle peers
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        limiter.retain_recent();
                    }
                });
                ws_routes = ws_routes.layer(GovernorLayer { config });
            }
            None => tracing::warn!("Invalid rate limit settings, handshake limiting disabled"),
        }
    }

    // Bearer-authenticated REST routes (AuthUser extractor validates token)
    let api_routes = Router::new()
        .route("/presence/online", get(presence::get_online_users))
        .route("/presence/status/{user_id}", get(presence::get_user_status))
        .route("/api/chats", post(chats::create_chat))
        .route(
            "/api/chats/{chat_id}/messages",
            get(messages::get_history).post(messages::create_message),
        )
        .route("/api/messages/{message_id}", delete(messages::delete_message));

    Router::new()
        .route("/health", get(health))
        .merge(ws_routes)
        .merge(api_routes)
        .with_state(state)
}
