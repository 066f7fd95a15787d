//! Shared helpers for integration tests: a fake identity provider and a test
//! server bound to an ephemeral port.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chathub_server::bridge::MemoryPubSub;
use chathub_server::chat::ChatStore;
use chathub_server::collab::IdentityProvider;
use chathub_server::config::HubConfig;
use chathub_server::error::{AuthError, CollabError};
use chathub_server::hub::Hub;
use chathub_server::state::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Accepts `token-{user}` for any user. `token-down` simulates an
/// unreachable identity service. Users named `ghost*` have no profile.
pub struct StaticIdentity;

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn validate_token(&self, token: &str) -> Result<String, AuthError> {
        match token.strip_prefix("token-") {
            Some("down") => Err(AuthError::Unavailable(CollabError::Timeout)),
            Some(user) if !user.is_empty() => Ok(user.to_string()),
            _ => Err(AuthError::Invalid),
        }
    }

    async fn display_name(&self, user_id: &str) -> Result<String, CollabError> {
        if user_id.starts_with("ghost") {
            return Err(CollabError::NotFound);
        }
        let mut chars = user_id.chars();
        Ok(chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect())
            .unwrap_or_default())
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(HubConfig::default()).await
    }

    pub async fn start_with(hub_config: HubConfig) -> Self {
        let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = chathub_server::db::init_db(data_dir.path().to_str().unwrap())
            .expect("Failed to init DB");

        let hub = Hub::new(hub_config, Arc::new(MemoryPubSub::new(256)), "chat");
        hub.start_presence_sync()
            .await
            .expect("Failed to start presence sync");
        let state = AppState::new(hub, Arc::new(StaticIdentity), ChatStore::new(db));

        let app = chathub_server::routes::build_router(state.clone(), None);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            addr,
            state,
            _data_dir: data_dir,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Create a chat directly through the store.
    pub async fn create_chat(&self, creator: &str, others: &[&str]) -> String {
        self.state
            .store
            .create_chat(None, creator, others.iter().map(|s| s.to_string()).collect())
            .await
            .expect("Failed to create chat")
            .id
    }

    pub async fn connect_presence(&self, user: &str) -> WsStream {
        let url = format!("ws://{}/ws/presence?token=token-{}", self.addr, user);
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("Presence connection failed");
        ws
    }

    pub async fn connect_room(&self, user: &str, room_id: &str) -> WsStream {
        let url = format!("ws://{}/ws/chat/{}?token=token-{}", self.addr, room_id, user);
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("Room connection failed");
        ws
    }

    /// Wait until the hub reports `user` in the given online state.
    pub async fn wait_online(&self, user: &str, online: bool) {
        for _ in 0..100 {
            if self.state.hub.is_online(user) == online {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{user} never became online={online}");
    }
}

/// Next JSON text frame, or `None` after `wait` without one.
pub async fn next_json(ws: &mut WsStream, wait: Duration) -> Option<Value> {
    loop {
        match tokio::time::timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("Invalid JSON frame"))
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// All JSON frames that arrive before the stream goes quiet for 200ms.
pub async fn drain(ws: &mut WsStream) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Some(frame) = next_json(ws, Duration::from_millis(200)).await {
        frames.push(frame);
    }
    frames
}

/// `USER_STATUS` values received for `user`, in order.
pub fn statuses_for(frames: &[Value], user: &str) -> Vec<String> {
    frames
        .iter()
        .filter(|f| f["type"] == "USER_STATUS" && f["userId"] == user)
        .filter_map(|f| f["payload"]["status"].as_str().map(str::to_string))
        .collect()
}
