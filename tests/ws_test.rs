//! Integration tests for the WebSocket streams: handshake, presence, message
//! fan-out, frame limits and keepalive.

mod common;

use common::{drain, next_json, statuses_for, TestServer};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::{self, Message};

use chathub_server::collab::MessageRepository;
use chathub_server::config::HubConfig;

const WAIT: Duration = Duration::from_secs(2);

async fn handshake_status(url: String) -> u16 {
    match tokio_tungstenite::connect_async(url).await {
        Ok(_) => 101,
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("Unexpected handshake error: {e}"),
    }
}

#[tokio::test]
async fn test_handshake_rejections() {
    let server = TestServer::start().await;
    let chat_id = server.create_chat("alice", &["bob"]).await;
    let addr = server.addr;

    assert_eq!(handshake_status(format!("ws://{addr}/ws/presence")).await, 401);
    assert_eq!(
        handshake_status(format!("ws://{addr}/ws/presence?token=garbage")).await,
        401
    );
    assert_eq!(
        handshake_status(format!("ws://{addr}/ws/chat/{chat_id}?token=token-mallory")).await,
        403
    );
    assert_eq!(
        handshake_status(format!("ws://{addr}/ws/chat/{chat_id}?token=token-down")).await,
        503
    );
    assert_eq!(
        handshake_status(format!("ws://{addr}/ws/chat/{chat_id}?token=token-bob")).await,
        101
    );

    // Rejected handshakes leave no trace in the hub.
    assert!(!server.state.hub.is_online("mallory"));
}

#[tokio::test]
async fn test_presence_scenario_single_offline() {
    let server = TestServer::start().await;
    let chat_id = server.create_chat("alice", &[]).await;

    let mut observer = server.connect_presence("obs").await;
    server.wait_online("obs", true).await;
    drain(&mut observer).await;

    let global = server.connect_presence("alice").await;
    server.wait_online("alice", true).await;
    let room = server.connect_room("alice", &chat_id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    drop(global);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.state.hub.is_online("alice"), "room stream keeps alice online");

    drop(room);
    server.wait_online("alice", false).await;

    let frames = drain(&mut observer).await;
    assert_eq!(statuses_for(&frames, "alice"), vec!["ONLINE", "OFFLINE"]);
}

#[tokio::test]
async fn test_presence_snapshot_on_connect() {
    let server = TestServer::start().await;
    let _bob = server.connect_presence("bob").await;
    server.wait_online("bob", true).await;

    let mut carol = server.connect_presence("carol").await;
    let first = next_json(&mut carol, WAIT).await.expect("snapshot frame");
    assert_eq!(first["type"], "USER_STATUS");
    assert_eq!(first["userId"], "bob");
    assert_eq!(first["payload"]["status"], "ONLINE");

    let rest = drain(&mut carol).await;
    assert_eq!(statuses_for(&rest, "carol"), vec!["ONLINE"]);
    assert!(statuses_for(&rest, "bob").is_empty());
}

#[tokio::test]
async fn test_message_scenario() {
    let server = TestServer::start().await;
    let chat_id = server.create_chat("a", &["b", "c", "d"]).await;

    let mut a = server.connect_room("a", &chat_id).await;
    let mut b = server.connect_room("b", &chat_id).await;
    let mut a_global = server.connect_presence("a").await;
    let mut c = server.connect_presence("c").await;
    let mut d = server.connect_presence("d").await;
    for user in ["a", "b", "c", "d"] {
        server.wait_online(user, true).await;
    }
    for ws in [&mut a, &mut b, &mut a_global, &mut c, &mut d] {
        drain(ws).await;
    }

    a.send(Message::Text(
        json!({ "type": "MESSAGE", "content": "hello team" }).to_string().into(),
    ))
    .await
    .unwrap();

    for ws in [&mut a, &mut b] {
        let frames = drain(ws).await;
        assert_eq!(frames.len(), 1, "exactly one room delivery: {frames:?}");
        assert_eq!(frames[0]["content"], "hello team");
        assert_eq!(frames[0]["senderId"], "a");
        assert_eq!(frames[0]["senderName"], "A");
        assert_eq!(frames[0]["messageType"], "TEXT");
    }

    for ws in [&mut c, &mut d] {
        let frames = drain(ws).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "NEW_MESSAGE_NOTIFICATION");
        assert_eq!(frames[0]["chatId"], chat_id.as_str());
        assert_eq!(frames[0]["payload"]["senderName"], "A");
        assert_eq!(frames[0]["payload"]["preview"], "hello team");
    }
    assert!(drain(&mut a_global).await.is_empty(), "no self-notification");

    let page = server
        .state
        .messages
        .list_messages(&chat_id, None, 10)
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 1);
}

#[tokio::test]
async fn test_typing_and_read_receipts() {
    let server = TestServer::start().await;
    let chat_id = server.create_chat("alice", &["ghost1"]).await;

    let mut alice = server.connect_room("alice", &chat_id).await;
    let mut ghost = server.connect_room("ghost1", &chat_id).await;
    server.wait_online("ghost1", true).await;
    drain(&mut alice).await;
    drain(&mut ghost).await;

    ghost
        .send(Message::Text(json!({ "type": "TYPING_START" }).to_string().into()))
        .await
        .unwrap();
    let typing = next_json(&mut alice, WAIT).await.expect("typing frame");
    assert_eq!(typing["type"], "USER_TYPING");
    assert_eq!(typing["userId"], "ghost1");
    assert_eq!(typing["payload"]["userName"], "Unknown User");

    ghost
        .send(Message::Text(json!({ "type": "TYPING_STOP" }).to_string().into()))
        .await
        .unwrap();
    let stop = next_json(&mut alice, WAIT).await.expect("typing stop frame");
    assert_eq!(stop["type"], "USER_TYPING_STOP");

    alice
        .send(Message::Text(
            json!({ "type": "MESSAGE", "content": "read me" }).to_string().into(),
        ))
        .await
        .unwrap();
    drain(&mut alice).await;
    let message = drain(&mut ghost)
        .await
        .into_iter()
        .find(|f| f["content"] == "read me")
        .expect("message frame");
    let message_id = message["id"].as_str().unwrap().to_string();

    ghost
        .send(Message::Text(
            json!({ "type": "READ_MESSAGE", "messageId": message_id })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let receipt = next_json(&mut alice, WAIT).await.expect("read receipt");
    assert_eq!(receipt["type"], "MESSAGE_READ");
    assert_eq!(receipt["messageId"], message_id.as_str());
    assert_eq!(receipt["userId"], "ghost1");
}

#[tokio::test]
async fn test_invalid_frames_get_error_reply() {
    let server = TestServer::start().await;
    let chat_id = server.create_chat("alice", &[]).await;
    let mut alice = server.connect_room("alice", &chat_id).await;
    server.wait_online("alice", true).await;
    drain(&mut alice).await;

    alice.send(Message::Text("not json".into())).await.unwrap();
    let error = next_json(&mut alice, WAIT).await.expect("error frame");
    assert_eq!(error["type"], "ERROR");

    alice
        .send(Message::Text(
            json!({ "type": "MESSAGE", "content": "   " }).to_string().into(),
        ))
        .await
        .unwrap();
    let error = next_json(&mut alice, WAIT).await.expect("error frame");
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["payload"]["message"], "message content is empty");

    assert!(server.state.hub.is_online("alice"), "protocol errors keep the stream open");
}

#[tokio::test]
async fn test_oversized_frame_is_discarded() {
    let server = TestServer::start_with(HubConfig {
        max_frame_bytes: 1024,
        ..HubConfig::default()
    })
    .await;
    let chat_id = server.create_chat("alice", &["bob"]).await;
    let mut alice = server.connect_room("alice", &chat_id).await;
    let mut bob = server.connect_room("bob", &chat_id).await;
    server.wait_online("bob", true).await;
    drain(&mut alice).await;
    drain(&mut bob).await;

    let huge = json!({ "type": "MESSAGE", "content": "x".repeat(2048) }).to_string();
    alice.send(Message::Text(huge.into())).await.unwrap();
    alice
        .send(Message::Text(json!({ "type": "TYPING_START" }).to_string().into()))
        .await
        .unwrap();

    let frames = drain(&mut bob).await;
    assert_eq!(frames.len(), 1, "only the typing frame arrives: {frames:?}");
    assert_eq!(frames[0]["type"], "USER_TYPING");
    assert!(server.state.hub.is_online("alice"));
}

#[tokio::test]
async fn test_read_deadline_closes_silent_peer() {
    let server = TestServer::start_with(HubConfig {
        pong_wait_ms: 300,
        ping_period_ms: 100,
        ..HubConfig::default()
    })
    .await;

    // Never polled, so it never answers pings.
    let _silent = server.connect_presence("sleepy").await;
    server.wait_online("sleepy", true).await;

    // Polling answers pings automatically, which keeps the stream alive.
    let mut active = server.connect_presence("awake").await;
    server.wait_online("awake", true).await;
    let reader = tokio::spawn(async move {
        while let Some(Ok(_)) = active.next().await {}
    });

    server.wait_online("sleepy", false).await;
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(server.state.hub.is_online("awake"));
    reader.abort();
}

#[tokio::test]
async fn test_bearer_header_is_accepted_for_upgrade() {
    use tungstenite::client::IntoClientRequest;

    let server = TestServer::start().await;
    let mut request = format!("ws://{}/ws/presence", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Authorization", "Bearer token-dana".parse().unwrap());

    let (_ws, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.status().as_u16(), 101);
    server.wait_online("dana", true).await;
}
