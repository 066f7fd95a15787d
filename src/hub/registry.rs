//! Connection registry: which room connections are open on this instance.
//!
//! Room sets and the reverse `conn_id -> room_id` index live under a single
//! `RwLock`, so presence recomputation always scans a consistent snapshot.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::connection::ConnectionHandle;

#[derive(Default)]
struct Rooms {
    /// room_id -> conn_id -> handle
    rooms: HashMap<String, HashMap<Uuid, ConnectionHandle>>,
    /// conn_id -> room_id
    index: HashMap<Uuid, String>,
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<Rooms>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Rooms> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Rooms> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a connection to a room set. A connection already attached
    /// elsewhere is moved, keeping the one-room-per-connection invariant.
    pub fn attach(&self, room_id: &str, conn: ConnectionHandle) {
        let mut guard = self.write();
        let inner = &mut *guard;
        let conn_id = conn.id();

        if let Some(previous) = inner.index.insert(conn_id, room_id.to_string()) {
            remove_from_room(&mut inner.rooms, &previous, &conn_id);
        }
        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id, conn);
    }

    /// Remove a connection from whatever room it is in. Returns `None` if it
    /// was not attached, which makes repeated teardown harmless.
    pub fn detach(&self, conn_id: &Uuid) -> Option<ConnectionHandle> {
        let mut guard = self.write();
        let inner = &mut *guard;
        let room_id = inner.index.remove(conn_id)?;
        remove_from_room(&mut inner.rooms, &room_id, conn_id)
    }

    pub fn connections_in_room(&self, room_id: &str) -> Vec<ConnectionHandle> {
        self.read()
            .rooms
            .get(room_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Linear scan over every room set.
    pub fn is_user_present_anywhere(&self, user_id: &str) -> bool {
        self.read()
            .rooms
            .values()
            .any(|set| set.values().any(|conn| conn.user_id() == user_id))
    }

    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.read()
            .rooms
            .values()
            .flat_map(|set| set.values().cloned())
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.read().rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.read().index.len()
    }
}

fn remove_from_room(
    rooms: &mut HashMap<String, HashMap<Uuid, ConnectionHandle>>,
    room_id: &str,
    conn_id: &Uuid,
) -> Option<ConnectionHandle> {
    let set = rooms.get_mut(room_id)?;
    let removed = set.remove(conn_id);
    if set.is_empty() {
        rooms.remove(room_id);
    }
    removed
}
