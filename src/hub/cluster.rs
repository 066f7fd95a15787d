//! Presence shared between instances.
//!
//! Each instance announces its own transitions on the bridge presence topic
//! and periodically republishes everyone it holds online. Remote users are
//! tracked per origin instance so one sibling going quiet only takes its own
//! users with it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Wire form of a presence announcement on the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum PresenceAnnouncement {
    /// One user's stored flag changed on `origin`.
    Status {
        origin: String,
        user_id: String,
        online: bool,
    },
    /// Every user `origin` currently holds online.
    Snapshot { origin: String, users: Vec<String> },
}

impl PresenceAnnouncement {
    pub fn origin(&self) -> &str {
        match self {
            Self::Status { origin, .. } | Self::Snapshot { origin, .. } => origin,
        }
    }
}

struct RemoteInstance {
    users: HashSet<String>,
    last_seen: Instant,
}

/// Users held online by sibling instances.
#[derive(Default)]
pub struct RemotePresence {
    instances: Mutex<HashMap<String, RemoteInstance>>,
}

/// A user whose remote online state changed, with the new state.
pub type RemoteChange = (String, bool);

impl RemotePresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        held_anywhere(&self.lock(), user_id)
    }

    pub fn users(&self) -> HashSet<String> {
        self.lock()
            .values()
            .flat_map(|instance| instance.users.iter().cloned())
            .collect()
    }

    pub fn instance_count(&self) -> usize {
        self.lock().len()
    }

    /// Apply an announcement from a sibling. Returns the users whose remote
    /// state changed.
    pub fn apply(&self, announcement: PresenceAnnouncement, now: Instant) -> Vec<RemoteChange> {
        let mut instances = self.lock();
        match announcement {
            PresenceAnnouncement::Status {
                origin,
                user_id,
                online,
            } => {
                let candidates = HashSet::from([user_id.clone()]);
                diff(&mut instances, candidates, |instances| {
                    let instance = entry(instances, origin, now);
                    if online {
                        instance.users.insert(user_id);
                    } else {
                        instance.users.remove(&user_id);
                    }
                })
            }
            PresenceAnnouncement::Snapshot { origin, users } => {
                let users: HashSet<String> = users.into_iter().collect();
                let mut candidates = users.clone();
                if let Some(previous) = instances.get(&origin) {
                    candidates.extend(previous.users.iter().cloned());
                }
                diff(&mut instances, candidates, |instances| {
                    entry(instances, origin, now).users = users;
                })
            }
        }
    }

    /// Forget siblings not heard from within `max_silence`.
    pub fn expire(&self, max_silence: Duration, now: Instant) -> Vec<RemoteChange> {
        let mut instances = self.lock();
        let stale: Vec<String> = instances
            .iter()
            .filter(|(_, instance)| now.saturating_duration_since(instance.last_seen) > max_silence)
            .map(|(origin, _)| origin.clone())
            .collect();
        if stale.is_empty() {
            return Vec::new();
        }

        let candidates: HashSet<String> = stale
            .iter()
            .filter_map(|origin| instances.get(origin))
            .flat_map(|instance| instance.users.iter().cloned())
            .collect();
        diff(&mut instances, candidates, |instances| {
            for origin in &stale {
                tracing::info!(origin = %origin, "Sibling instance expired from presence");
                instances.remove(origin);
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RemoteInstance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn held_anywhere(instances: &HashMap<String, RemoteInstance>, user_id: &str) -> bool {
    instances.values().any(|instance| instance.users.contains(user_id))
}

fn entry(
    instances: &mut HashMap<String, RemoteInstance>,
    origin: String,
    now: Instant,
) -> &mut RemoteInstance {
    let instance = instances.entry(origin).or_insert_with(|| RemoteInstance {
        users: HashSet::new(),
        last_seen: now,
    });
    instance.last_seen = now;
    instance
}

/// Run `update` and report which of `candidates` flipped.
fn diff(
    instances: &mut HashMap<String, RemoteInstance>,
    candidates: HashSet<String>,
    update: impl FnOnce(&mut HashMap<String, RemoteInstance>),
) -> Vec<RemoteChange> {
    let before: Vec<(String, bool)> = candidates
        .into_iter()
        .map(|user| {
            let held = held_anywhere(instances, &user);
            (user, held)
        })
        .collect();
    update(instances);
    let mut changes: Vec<RemoteChange> = before
        .into_iter()
        .filter_map(|(user, was)| {
            let now = held_anywhere(instances, &user);
            (now != was).then_some((user, now))
        })
        .collect();
    changes.sort();
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(origin: &str, user: &str, online: bool) -> PresenceAnnouncement {
        PresenceAnnouncement::Status {
            origin: origin.into(),
            user_id: user.into(),
            online,
        }
    }

    fn snapshot(origin: &str, users: &[&str]) -> PresenceAnnouncement {
        PresenceAnnouncement::Snapshot {
            origin: origin.into(),
            users: users.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(status("i-1", "alice", true)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "STATUS", "origin": "i-1", "userId": "alice", "online": true })
        );
        let back: PresenceAnnouncement = serde_json::from_value(json).unwrap();
        assert_eq!(back.origin(), "i-1");
    }

    #[test]
    fn test_user_is_online_while_any_sibling_holds_them() {
        let remote = RemotePresence::new();
        let now = Instant::now();

        assert_eq!(remote.apply(status("i-1", "alice", true), now), vec![("alice".into(), true)]);
        assert!(remote.apply(status("i-2", "alice", true), now).is_empty());
        assert!(remote.apply(status("i-1", "alice", false), now).is_empty());
        assert!(remote.is_online("alice"));
        assert_eq!(remote.apply(status("i-2", "alice", false), now), vec![("alice".into(), false)]);
        assert!(!remote.is_online("alice"));
    }

    #[test]
    fn test_snapshot_replaces_origin_view() {
        let remote = RemotePresence::new();
        let now = Instant::now();
        remote.apply(snapshot("i-1", &["alice", "bob"]), now);

        let changes = remote.apply(snapshot("i-1", &["bob", "carol"]), now);
        assert_eq!(changes, vec![("alice".into(), false), ("carol".into(), true)]);
        assert_eq!(remote.users(), HashSet::from(["bob".to_string(), "carol".to_string()]));
    }

    #[test]
    fn test_silent_sibling_expires() {
        let remote = RemotePresence::new();
        let start = Instant::now();
        remote.apply(snapshot("i-1", &["alice"]), start);
        remote.apply(snapshot("i-2", &["bob"]), start + Duration::from_secs(20));

        let changes = remote.expire(Duration::from_secs(30), start + Duration::from_secs(40));
        assert_eq!(changes, vec![("alice".into(), false)]);
        assert_eq!(remote.instance_count(), 1);
        assert!(remote.is_online("bob"));
    }
}
