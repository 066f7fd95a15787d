//! Frame delivery onto connection queues.
//!
//! Callers serialize an event once and hand the shared frame here. Nothing in
//! this module takes a registry or presence lock; targets are snapshots.

use futures_util::future::join_all;
use std::time::Duration;

use super::connection::{ConnectionHandle, EnqueueError, Frame};

/// Result of a non-blocking fan-out.
#[derive(Debug, Default)]
pub struct Delivery {
    pub delivered: usize,
    /// Targets whose queue was full or closed. The caller evicts them.
    pub failed: Vec<ConnectionHandle>,
}

/// Queue `frame` on every target without waiting. Connections already being
/// evicted are skipped.
pub fn try_deliver(targets: &[ConnectionHandle], frame: &Frame) -> Delivery {
    let mut delivery = Delivery::default();
    for conn in targets {
        if conn.is_evicted() {
            continue;
        }
        match conn.try_enqueue(frame.clone()) {
            Ok(()) => delivery.delivered += 1,
            Err(reason) => {
                tracing::warn!(
                    conn_id = %conn.id(),
                    user_id = %conn.user_id(),
                    ?reason,
                    "Outbound queue unavailable, evicting connection"
                );
                delivery.failed.push(conn.clone());
            }
        }
    }
    delivery
}

/// Queue `frame` on every target, each waiting at most `deadline` for space.
/// Targets are independent: one slow peer does not delay the others past the
/// deadline. Returns how many frames were queued.
pub async fn deliver_within(targets: &[ConnectionHandle], frame: &Frame, deadline: Duration) -> usize {
    let sends = targets.iter().map(|conn| async move {
        match conn.enqueue_within(frame.clone(), deadline).await {
            Ok(()) => true,
            Err(EnqueueError::Full) => {
                tracing::warn!(
                    conn_id = %conn.id(),
                    user_id = %conn.user_id(),
                    "Push deadline exceeded, frame dropped"
                );
                false
            }
            Err(EnqueueError::Closed) => {
                tracing::debug!(conn_id = %conn.id(), "Push target already closed");
                false
            }
        }
    });
    join_all(sends).await.into_iter().filter(|ok| *ok).count()
}
