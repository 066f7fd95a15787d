use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::hub::{ConnectionScope, Frame, OutboundEvent};
use crate::state::AppState;
use crate::ws::protocol;

/// How long teardown waits for the writer to flush a close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Run one authenticated connection until either side ends it.
///
/// The socket is split between this task (reader) and a writer task that
/// owns the sink. Everything else reaches the client through the
/// connection's bounded queue; the eviction token tells both tasks to stop.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    user_id: String,
    display_name: String,
    scope: ConnectionScope,
) {
    let hub = state.hub.clone();
    let config = hub.config().clone();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (conn, rx) = hub.open_connection(&user_id, &display_name, scope);

    let forwarder = match hub.admit(&conn).await {
        Ok(forwarder) => forwarder,
        Err(e) => {
            tracing::error!(user_id = %user_id, "Failed to subscribe connection to bridge: {}", e);
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "Bridge unavailable".into(),
                })))
                .await;
            return;
        }
    };

    // A presence client learns who else is online before the writer starts
    // draining queued transitions. Taken after admission so no transition
    // falls between the two; one may appear in both.
    if conn.room_id().is_none() {
        for other in hub.online_users().into_iter().filter(|u| *u != user_id) {
            let event = OutboundEvent::UserStatusChanged {
                user_id: other,
                online: true,
            };
            let Ok(frame) = event.to_frame() else {
                continue;
            };
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                tracing::debug!(user_id = %user_id, "Client gone during presence snapshot");
                hub.release(&conn);
                return;
            }
        }
    }

    tracing::info!(
        user_id = %user_id,
        conn_id = %conn.id(),
        room_id = conn.room_id().unwrap_or("-"),
        "WebSocket actor started"
    );

    let evicted = conn.eviction_token();
    let mut writer = tokio::spawn(writer_task(ws_sender, rx, evicted.clone(), config.ping_period()));
    let mut writer_finished = false;
    let pong_wait = config.pong_wait();

    // Reader loop: every frame (pongs included) refreshes the read deadline.
    loop {
        let next = tokio::select! {
            _ = &mut writer => {
                writer_finished = true;
                break;
            }
            _ = evicted.cancelled() => break,
            next = timeout(pong_wait, ws_receiver.next()) => next,
        };

        match next {
            Err(_) => {
                tracing::info!(user_id = %user_id, conn_id = %conn.id(), "Read deadline exceeded");
                break;
            }
            Ok(None) => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(user_id = %user_id, error = %e, "WebSocket receive error");
                break;
            }
            Ok(Some(Ok(msg))) => match msg {
                Message::Text(text) => {
                    if text.as_str().len() > config.max_frame_bytes {
                        tracing::warn!(
                            user_id = %user_id,
                            size = text.as_str().len(),
                            limit = config.max_frame_bytes,
                            "Oversized frame discarded"
                        );
                        continue;
                    }
                    protocol::handle_text_message(text.as_str(), &conn, &state).await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        user_id = %user_id,
                        size = data.len(),
                        "Binary frame ignored (protocol is JSON text)"
                    );
                }
                // Pings are answered by the transport.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(frame) => {
                    tracing::info!(user_id = %user_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
        }
    }

    // Teardown: stop forwarding, let an evicted writer flush its close
    // frame, then release the connection's presence contribution.
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    if !writer_finished && conn.is_evicted() {
        let _ = timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await;
    }
    writer.abort();
    hub.release(&conn);

    tracing::info!(user_id = %user_id, conn_id = %conn.id(), "WebSocket actor stopped");
}

/// Writer task: drains the outbound queue to the socket and keeps the peer
/// alive with pings. On eviction it sends a policy-violation close.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
    evicted: CancellationToken,
    ping_period: Duration,
) {
    let mut ping_timer = interval(ping_period);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = evicted.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: "Connection evicted".into(),
                    })))
                    .await;
                break;
            }
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ping_timer.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}
