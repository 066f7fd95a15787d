//! Presence tracking.
//!
//! A user is online iff they hold at least one global presence connection or
//! at least one room connection. The stored flag is only ever written by
//! `recompute_online`, which derives it from the current state.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use super::connection::ConnectionHandle;
use super::registry::Registry;

#[derive(Default)]
pub struct PresenceTracker {
    /// user_id -> open presence connections (its length is the global count)
    global: DashMap<String, Vec<ConnectionHandle>>,
    /// users whose stored flag is online
    online: Mutex<HashSet<String>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_global_connect(&self, conn: ConnectionHandle) {
        self.global
            .entry(conn.user_id().to_string())
            .or_default()
            .push(conn);
    }

    /// Remove one presence connection. Returns `false` if it was not tracked.
    pub fn mark_global_disconnect(&self, conn: &ConnectionHandle) -> bool {
        let mut removed = false;
        let mut now_empty = false;

        if let Some(mut conns) = self.global.get_mut(conn.user_id()) {
            let before = conns.len();
            conns.retain(|c| c.id() != conn.id());
            removed = conns.len() != before;
            now_empty = conns.is_empty();
        }

        if now_empty {
            self.global
                .remove_if(conn.user_id(), |_, conns| conns.is_empty());
        }
        removed
    }

    pub fn global_count(&self, user_id: &str) -> usize {
        self.global.get(user_id).map(|v| v.len()).unwrap_or(0)
    }

    pub fn global_connections(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.global
            .get(user_id)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    pub fn all_global_connections(&self) -> Vec<ConnectionHandle> {
        self.global
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    /// Online state as derived from live connections, ignoring the stored flag.
    pub fn derive_online(&self, user_id: &str, registry: &Registry) -> bool {
        self.global_count(user_id) > 0 || registry.is_user_present_anywhere(user_id)
    }

    /// Re-derive the user's online flag and store it. Returns the new value
    /// when it changed, `None` otherwise.
    pub fn recompute_online(&self, user_id: &str, registry: &Registry) -> Option<bool> {
        let mut online = self.online.lock().unwrap_or_else(PoisonError::into_inner);
        let derived = self.derive_online(user_id, registry);
        let stored = online.contains(user_id);

        if derived == stored {
            return None;
        }
        if derived {
            online.insert(user_id.to_string());
        } else {
            online.remove(user_id);
        }
        Some(derived)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user_id)
    }

    /// All users currently flagged online, sorted.
    pub fn snapshot(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        users.sort();
        users
    }
}
