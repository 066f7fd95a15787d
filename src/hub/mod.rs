//! The connection hub: registry, presence tracker and bridge behind one
//! service object.
//!
//! All mutations that can change a user's online state go through `Hub`, which
//! recomputes presence and broadcasts the transition. Evictions caused by a
//! broadcast are queued on a worklist and processed in the same call.
//!
//! A user is visible as online when this instance or any sibling holds them.
//! Local connections only see a `USER_STATUS` when that visible state flips.

pub mod cluster;
pub mod connection;
pub mod events;
pub mod fanout;
pub mod presence;
pub mod registry;

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use crate::bridge::{presence_topic, room_topic, PubSub, Subscription};
use crate::config::HubConfig;
use crate::error::BridgeError;

use cluster::{PresenceAnnouncement, RemoteChange, RemotePresence};

pub use connection::{ConnectionHandle, ConnectionScope, EnqueueError, Frame};
pub use events::{InboundFrame, OutboundEvent};
pub use presence::PresenceTracker;
pub use registry::Registry;

/// Pending hub bookkeeping.
enum Work {
    /// Drop a connection that failed a delivery.
    Evict(ConnectionHandle),
    /// Re-derive a user's online flag. `settled` skips the grace period.
    Refresh { user_id: String, settled: bool },
    /// A sibling instance started or stopped holding a user.
    Remote { user_id: String, online: bool },
}

/// Silent siblings are dropped after this many sync intervals.
const SIBLING_EXPIRY_INTERVALS: u32 = 3;

pub struct Hub {
    registry: Registry,
    presence: PresenceTracker,
    remote: RemotePresence,
    bridge: Arc<dyn PubSub>,
    config: HubConfig,
    topic_prefix: String,
    instance_id: String,
    announcer: OnceLock<mpsc::UnboundedSender<PresenceAnnouncement>>,
}

impl Hub {
    pub fn new(config: HubConfig, bridge: Arc<dyn PubSub>, topic_prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            registry: Registry::new(),
            presence: PresenceTracker::new(),
            remote: RemotePresence::new(),
            bridge,
            config,
            topic_prefix: topic_prefix.to_string(),
            instance_id: Uuid::now_v7().to_string(),
            announcer: OnceLock::new(),
        })
    }

    /// Identifies this instance in presence announcements.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Share presence with sibling instances over the bridge.
    ///
    /// Subscribes to the presence topic, then runs a task that publishes
    /// local transitions in order, applies siblings' announcements, and on
    /// every sync tick republishes the local online set and expires silent
    /// siblings. Without it the hub's presence is process-local.
    pub async fn start_presence_sync(self: &Arc<Self>) -> Result<JoinHandle<()>, BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.announcer.set(tx).is_err() {
            return Err(BridgeError::Transport("presence sync already running".into()));
        }
        let subscription = self.bridge.subscribe(&presence_topic(&self.topic_prefix)).await?;
        tracing::info!(instance_id = %self.instance_id, "Presence sync started");
        Ok(tokio::spawn(presence_sync(Arc::clone(self), rx, subscription)))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Create a handle with the configured outbound buffer. It is not visible
    /// to fan-out until `admit`.
    pub fn open_connection(
        &self,
        user_id: &str,
        display_name: &str,
        scope: ConnectionScope,
    ) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        ConnectionHandle::new(user_id, display_name, scope, self.config.outbound_buffer)
    }

    /// Make a connection live. Room connections are subscribed to their room
    /// topic first; the returned task forwards bridge payloads onto the
    /// connection's queue and must be aborted on teardown.
    pub async fn admit(
        self: &Arc<Self>,
        conn: &ConnectionHandle,
    ) -> Result<Option<JoinHandle<()>>, BridgeError> {
        let forwarder = match conn.scope() {
            ConnectionScope::Room(room_id) => {
                let topic = room_topic(&self.topic_prefix, room_id);
                let subscription = self.bridge.subscribe(&topic).await?;
                self.registry.attach(room_id, conn.clone());
                Some(tokio::spawn(forward_bridge(
                    Arc::clone(self),
                    conn.clone(),
                    subscription,
                )))
            }
            ConnectionScope::Presence => {
                self.presence.mark_global_connect(conn.clone());
                None
            }
        };

        tracing::info!(
            conn_id = %conn.id(),
            user_id = %conn.user_id(),
            room_id = conn.room_id().unwrap_or("-"),
            "Connection admitted"
        );

        self.run(VecDeque::from([Work::Refresh {
            user_id: conn.user_id().to_string(),
            settled: false,
        }]));
        Ok(forwarder)
    }

    /// Remove a connection from the registry or tracker and recompute the
    /// user's presence. Safe to call more than once; returns `false` if the
    /// connection was already gone.
    pub fn release(self: &Arc<Self>, conn: &ConnectionHandle) -> bool {
        if !self.remove(conn) {
            return false;
        }
        tracing::info!(
            conn_id = %conn.id(),
            user_id = %conn.user_id(),
            room_id = conn.room_id().unwrap_or("-"),
            "Connection released"
        );
        self.run(VecDeque::from([Work::Refresh {
            user_id: conn.user_id().to_string(),
            settled: false,
        }]));
        true
    }

    /// Signal a connection to close and release it.
    pub fn evict(self: &Arc<Self>, conn: &ConnectionHandle) {
        self.run(VecDeque::from([Work::Evict(conn.clone())]));
    }

    /// Deliver an event to every local connection in a room. Peers whose
    /// queue is full are evicted before this returns.
    pub fn broadcast_room(self: &Arc<Self>, room_id: &str, event: &OutboundEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let targets = self.registry.connections_in_room(room_id);
        let delivery = fanout::try_deliver(&targets, &frame);
        if !delivery.failed.is_empty() {
            self.run(delivery.failed.into_iter().map(Work::Evict).collect());
        }
        delivery.delivered
    }

    /// Deliver an event to all of a user's presence connections, waiting at
    /// most the push deadline on each. Never evicts.
    pub async fn push_to_user(&self, user_id: &str, event: &OutboundEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let targets = self.presence.global_connections(user_id);
        if targets.is_empty() {
            return 0;
        }
        fanout::deliver_within(&targets, &frame, self.config.push_deadline()).await
    }

    /// Deliver an event to every room and presence connection.
    pub fn broadcast_all(self: &Arc<Self>, event: &OutboundEvent) -> usize {
        let Some(frame) = encode(event) else {
            return 0;
        };
        let mut work = VecDeque::new();
        let delivered = self.deliver_all(&frame, &mut work);
        self.run(work);
        delivered
    }

    /// Publish an event on a room's bridge topic so that room connections on
    /// every instance receive it.
    pub async fn publish_room(&self, room_id: &str, event: &OutboundEvent) -> Result<(), BridgeError> {
        let payload = event.to_json()?;
        let topic = room_topic(&self.topic_prefix, room_id);
        self.bridge.publish(&topic, payload).await
    }

    /// Online here or on any sibling instance.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.is_online(user_id) || self.remote.is_online(user_id)
    }

    /// Users online here or on any sibling instance, sorted.
    pub fn online_users(&self) -> Vec<String> {
        let mut users = self.remote.users();
        users.extend(self.presence.snapshot());
        let mut users: Vec<String> = users.into_iter().collect();
        users.sort();
        users
    }

    pub fn room_count(&self) -> usize {
        self.registry.room_count()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn global_count(&self, user_id: &str) -> usize {
        self.presence.global_count(user_id)
    }

    fn remove(&self, conn: &ConnectionHandle) -> bool {
        match conn.scope() {
            ConnectionScope::Room(_) => self.registry.detach(&conn.id()).is_some(),
            ConnectionScope::Presence => self.presence.mark_global_disconnect(conn),
        }
    }

    fn deliver_all(&self, frame: &Frame, work: &mut VecDeque<Work>) -> usize {
        let mut targets = self.registry.all_connections();
        targets.extend(self.presence.all_global_connections());
        let delivery = fanout::try_deliver(&targets, frame);
        work.extend(delivery.failed.into_iter().map(Work::Evict));
        delivery.delivered
    }

    fn run(self: &Arc<Self>, mut work: VecDeque<Work>) {
        while let Some(item) = work.pop_front() {
            match item {
                Work::Evict(conn) => {
                    conn.evict();
                    if self.remove(&conn) {
                        tracing::info!(
                            conn_id = %conn.id(),
                            user_id = %conn.user_id(),
                            "Connection evicted"
                        );
                        work.push_back(Work::Refresh {
                            user_id: conn.user_id().to_string(),
                            settled: false,
                        });
                    }
                }
                Work::Refresh { user_id, settled } => {
                    if !settled && self.should_defer_offline(&user_id) {
                        self.defer_refresh(user_id);
                        continue;
                    }
                    if let Some(online) = self.presence.recompute_online(&user_id, &self.registry) {
                        tracing::info!(user_id = %user_id, online, "Presence changed");
                        self.announce(PresenceAnnouncement::Status {
                            origin: self.instance_id.clone(),
                            user_id: user_id.clone(),
                            online,
                        });
                        // A sibling still holding the user keeps them visible.
                        if !self.remote.is_online(&user_id) {
                            self.notify_status(user_id, online, &mut work);
                        }
                    }
                }
                Work::Remote { user_id, online } => {
                    tracing::debug!(user_id = %user_id, online, "Remote presence changed");
                    if !self.presence.is_online(&user_id) {
                        self.notify_status(user_id, online, &mut work);
                    }
                }
            }
        }
    }

    fn notify_status(&self, user_id: String, online: bool, work: &mut VecDeque<Work>) {
        let event = OutboundEvent::UserStatusChanged { user_id, online };
        if let Some(frame) = encode(&event) {
            self.deliver_all(&frame, work);
        }
    }

    fn announce(&self, announcement: PresenceAnnouncement) {
        if let Some(announcer) = self.announcer.get() {
            let _ = announcer.send(announcement);
        }
    }

    fn apply_remote(self: &Arc<Self>, changes: Vec<RemoteChange>) {
        self.run(
            changes
                .into_iter()
                .map(|(user_id, online)| Work::Remote { user_id, online })
                .collect(),
        );
    }

    /// A pending OFFLINE transition inside the grace window.
    fn should_defer_offline(&self, user_id: &str) -> bool {
        !self.config.presence_grace().is_zero()
            && self.presence.is_online(user_id)
            && !self.presence.derive_online(user_id, &self.registry)
    }

    fn defer_refresh(self: &Arc<Self>, user_id: String) {
        let hub = Arc::clone(self);
        let grace = self.config.presence_grace();
        tracing::debug!(user_id = %user_id, ?grace, "Deferring offline transition");
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            hub.run(VecDeque::from([Work::Refresh {
                user_id,
                settled: true,
            }]));
        });
    }
}

fn encode(event: &OutboundEvent) -> Option<Frame> {
    match event.to_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(kind = ?event.kind(), "Failed to serialize event: {}", e);
            None
        }
    }
}

/// Presence sync loop, see `Hub::start_presence_sync`.
async fn presence_sync(
    hub: Arc<Hub>,
    mut announcements: mpsc::UnboundedReceiver<PresenceAnnouncement>,
    mut subscription: Subscription,
) {
    let period = hub.config.presence_sync();
    let mut ticker = interval(period.unwrap_or(Duration::from_secs(3600)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let topic = subscription.topic().to_string();

    loop {
        tokio::select! {
            Some(announcement) = announcements.recv() => {
                publish_announcement(&hub, &topic, &announcement).await;
            }
            received = subscription.recv() => match received {
                Ok(payload) => match serde_json::from_str::<PresenceAnnouncement>(&payload) {
                    Ok(announcement) if announcement.origin() == hub.instance_id => {}
                    Ok(announcement) => {
                        let changes = hub.remote.apply(announcement, Instant::now());
                        hub.apply_remote(changes);
                    }
                    Err(e) => tracing::warn!(topic = %topic, "Dropping malformed presence announcement: {}", e),
                },
                // The next snapshot repairs whatever was skipped.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %topic, skipped, "Presence sync lagged");
                }
                Err(RecvError::Closed) => {
                    tracing::warn!(topic = %topic, "Presence subscription closed, sync stopped");
                    break;
                }
            },
            _ = ticker.tick(), if period.is_some() => {
                let snapshot = PresenceAnnouncement::Snapshot {
                    origin: hub.instance_id.clone(),
                    users: hub.presence.snapshot(),
                };
                publish_announcement(&hub, &topic, &snapshot).await;
                if let Some(period) = period {
                    let changes = hub.remote.expire(period * SIBLING_EXPIRY_INTERVALS, Instant::now());
                    hub.apply_remote(changes);
                }
                tracing::debug!(siblings = hub.remote.instance_count(), "Presence snapshot published");
            }
        }
    }
}

async fn publish_announcement(hub: &Hub, topic: &str, announcement: &PresenceAnnouncement) {
    let payload = match serde_json::to_string(announcement) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to serialize presence announcement: {}", e);
            return;
        }
    };
    if let Err(e) = hub.bridge.publish(topic, payload).await {
        tracing::warn!(topic = %topic, "Presence announcement not published: {}", e);
    }
}

/// Drain a room subscription onto one connection's queue.
async fn forward_bridge(hub: Arc<Hub>, conn: ConnectionHandle, mut subscription: Subscription) {
    let evicted = conn.eviction_token();
    let wait = hub.config.bridge_wait();

    loop {
        let received = tokio::select! {
            _ = evicted.cancelled() => break,
            received = subscription.recv() => received,
        };

        match received {
            Ok(payload) => {
                if let Err(reason) = conn.enqueue_within(Frame::from(payload), wait).await {
                    tracing::warn!(
                        conn_id = %conn.id(),
                        topic = subscription.topic(),
                        ?reason,
                        "Bridge forward failed, evicting connection"
                    );
                    hub.evict(&conn);
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    conn_id = %conn.id(),
                    topic = subscription.topic(),
                    skipped,
                    "Bridge subscriber lagged"
                );
            }
            Err(RecvError::Closed) => {
                tracing::debug!(topic = subscription.topic(), "Bridge subscription closed");
                break;
            }
        }
    }
}
