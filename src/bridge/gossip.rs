//! Gossipsub-backed bridge for multi-instance deployments.
//!
//! The swarm runs in its own task; the rest of the process talks to it
//! through an mpsc command channel. Payloads received from the mesh are
//! handed to local subscribers through the shared `TopicTable`.

use async_trait::async_trait;
use futures_util::StreamExt;
use libp2p::{gossipsub, identify, noise, tcp, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder};
use tokio::sync::mpsc;

use super::behaviour::{build_behaviour, BridgeBehaviour, BridgeBehaviourEvent};
use super::config::GossipConfig;
use super::identity::node_keypair;
use super::{PubSub, Subscription, TopicTable};
use crate::error::BridgeError;

/// Commands sent to the swarm event loop. They share one channel so a
/// release is always handled after the subscribe it follows.
pub enum SwarmCommand {
    Subscribe(String),
    /// A local subscription was dropped; leave the topic if it was the last.
    Release(String),
    Publish { topic: String, data: Vec<u8> },
}

#[derive(Clone)]
pub struct GossipPubSub {
    topics: TopicTable,
    cmd_tx: mpsc::UnboundedSender<SwarmCommand>,
    peer_id: PeerId,
}

impl GossipPubSub {
    /// Build the swarm, start listening, dial the configured peers and spawn
    /// the event loop.
    pub async fn start(
        config: &GossipConfig,
        data_dir: &str,
        channel_capacity: usize,
    ) -> Result<Self, BridgeError> {
        let keypair = node_keypair(data_dir)?;
        let peer_id = PeerId::from(keypair.public());

        let behaviour_config = config.clone();
        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| BridgeError::Transport(e.to_string()))?
            .with_behaviour(|key| build_behaviour(key, &behaviour_config))
            .map_err(|e| BridgeError::Transport(e.to_string()))?
            .build();

        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", config.listen_port)
            .parse()
            .map_err(|e| BridgeError::Transport(format!("bad listen address: {e}")))?;
        swarm
            .listen_on(listen_addr.clone())
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        tracing::info!(peer_id = %peer_id, "Bridge listening on {}", listen_addr);

        for peer in &config.peers {
            match peer.parse::<Multiaddr>() {
                Ok(addr) => match swarm.dial(addr.clone()) {
                    Ok(()) => tracing::info!("Dialing bridge peer {}", addr),
                    Err(e) => tracing::warn!("Failed to dial bridge peer {}: {}", addr, e),
                },
                Err(e) => tracing::warn!("Ignoring invalid bridge peer {:?}: {}", peer, e),
            }
        }

        let topics = TopicTable::new(channel_capacity);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_swarm_loop(swarm, cmd_rx, topics.clone()));

        Ok(Self {
            topics,
            cmd_tx,
            peer_id,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }
}

#[async_trait]
impl PubSub for GossipPubSub {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BridgeError> {
        // Gossipsub never echoes to the publisher, so local subscribers get
        // the payload straight from the table.
        let data = payload.clone().into_bytes();
        self.topics.deliver(topic, payload);
        self.cmd_tx
            .send(SwarmCommand::Publish {
                topic: topic.to_string(),
                data,
            })
            .map_err(|_| BridgeError::Closed)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BridgeError> {
        let (rx, created) = self.topics.subscribe(topic);
        if created {
            self.cmd_tx
                .send(SwarmCommand::Subscribe(topic.to_string()))
                .map_err(|_| BridgeError::Closed)?;
        }
        let cmd_tx = self.cmd_tx.clone();
        let release = move |topic: String| {
            let _ = cmd_tx.send(SwarmCommand::Release(topic));
        };
        Ok(Subscription::new(topic, rx, Some(Box::new(release))))
    }
}

async fn run_swarm_loop(
    mut swarm: Swarm<BridgeBehaviour>,
    mut cmd_rx: mpsc::UnboundedReceiver<SwarmCommand>,
    topics: TopicTable,
) {
    loop {
        tokio::select! {
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &topics);
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => handle_swarm_command(&mut swarm.behaviour_mut().gossipsub, &topics, cmd),
                    None => {
                        tracing::info!("Bridge command channel closed, shutting down swarm");
                        break;
                    }
                }
            }
        }
    }
}

fn handle_swarm_event(event: libp2p::swarm::SwarmEvent<BridgeBehaviourEvent>, topics: &TopicTable) {
    use libp2p::swarm::SwarmEvent as LibSwarmEvent;

    match event {
        LibSwarmEvent::Behaviour(BridgeBehaviourEvent::Gossipsub(gossipsub::Event::Message {
            propagation_source,
            message,
            ..
        })) => {
            let topic = message.topic.to_string();
            match String::from_utf8(message.data) {
                Ok(payload) => {
                    let delivered = topics.deliver(&topic, payload);
                    tracing::debug!(
                        "Bridge payload from {} on {} delivered to {} local subscribers",
                        propagation_source,
                        topic,
                        delivered
                    );
                }
                Err(_) => {
                    tracing::warn!("Dropping non-UTF-8 bridge payload from {}", propagation_source);
                }
            }
        }
        LibSwarmEvent::Behaviour(BridgeBehaviourEvent::Identify(identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            tracing::debug!(
                "Identify: {} has {} listen addrs",
                peer_id,
                info.listen_addrs.len()
            );
        }
        LibSwarmEvent::ConnectionEstablished { peer_id, .. } => {
            tracing::info!("Bridge peer connected: {}", peer_id);
        }
        LibSwarmEvent::ConnectionClosed { peer_id, .. } => {
            tracing::info!("Bridge peer disconnected: {}", peer_id);
        }
        LibSwarmEvent::NewListenAddr { address, .. } => {
            tracing::info!("Bridge listening on: {}", address);
        }
        _ => {}
    }
}

fn handle_swarm_command(gossipsub: &mut gossipsub::Behaviour, topics: &TopicTable, cmd: SwarmCommand) {
    match cmd {
        SwarmCommand::Subscribe(topic_str) => {
            let topic = gossipsub::IdentTopic::new(&topic_str);
            match gossipsub.subscribe(&topic) {
                Ok(true) => tracing::debug!("Joined bridge topic {}", topic_str),
                Ok(false) => tracing::debug!("Already on bridge topic {}", topic_str),
                Err(e) => tracing::error!("Failed to join bridge topic {}: {:?}", topic_str, e),
            }
        }
        SwarmCommand::Release(topic_str) => {
            if topics.prune(&topic_str) {
                let topic = gossipsub::IdentTopic::new(&topic_str);
                if gossipsub.unsubscribe(&topic) {
                    tracing::debug!("Left bridge topic {}", topic_str);
                }
            }
        }
        SwarmCommand::Publish { topic, data } => {
            let gossip_topic = gossipsub::IdentTopic::new(&topic);
            match gossipsub.publish(gossip_topic, data) {
                Ok(msg_id) => tracing::debug!("Published to {}, message_id: {:?}", topic, msg_id),
                // Routine for a lone instance with no mesh peers; local
                // delivery has already happened.
                Err(e) => tracing::debug!("Bridge publish to {} not propagated: {:?}", topic, e),
            }
        }
    }
}
