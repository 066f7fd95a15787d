//! Per-connection handle shared with the registry and the presence tracker.
//!
//! The socket itself never leaves its actor. What the rest of the hub sees is
//! the sending half of the connection's bounded outbound queue and a
//! cancellation token used to evict it.

use axum::extract::ws::Utf8Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A serialized text frame, cheap to clone across many targets.
pub type Frame = Utf8Bytes;

/// What a connection is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionScope {
    /// A per-room chat stream.
    Room(String),
    /// The global presence stream of a running client.
    Presence,
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is at capacity (the peer is not draining it).
    Full,
    /// The writer has gone away.
    Closed,
}

#[derive(Debug)]
struct Inner {
    id: Uuid,
    user_id: String,
    display_name: String,
    scope: ConnectionScope,
    tx: mpsc::Sender<Frame>,
    evicted: CancellationToken,
}

/// Cloneable reference to one open connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving half of its outbound queue.
    pub fn new(
        user_id: &str,
        display_name: &str,
        scope: ConnectionScope,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            inner: Arc::new(Inner {
                id: Uuid::now_v7(),
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                scope,
                tx,
                evicted: CancellationToken::new(),
            }),
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn scope(&self) -> &ConnectionScope {
        &self.inner.scope
    }

    /// Room this connection is attached to, `None` for presence connections.
    pub fn room_id(&self) -> Option<&str> {
        match &self.inner.scope {
            ConnectionScope::Room(room_id) => Some(room_id),
            ConnectionScope::Presence => None,
        }
    }

    /// Non-blocking enqueue used by fan-out.
    pub fn try_enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        self.inner.tx.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Enqueue, waiting at most `deadline` for queue space.
    pub async fn enqueue_within(&self, frame: Frame, deadline: Duration) -> Result<(), EnqueueError> {
        self.inner
            .tx
            .send_timeout(frame, deadline)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => EnqueueError::Full,
                SendTimeoutError::Closed(_) => EnqueueError::Closed,
            })
    }

    /// Signal the connection's tasks to shut down.
    pub fn evict(&self) {
        self.inner.evicted.cancel();
    }

    pub fn is_evicted(&self) -> bool {
        self.inner.evicted.is_cancelled()
    }

    /// Token the connection's tasks select on to observe eviction.
    pub fn eviction_token(&self) -> CancellationToken {
        self.inner.evicted.clone()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}
