use libp2p::{gossipsub, identify, identity, ping, swarm::NetworkBehaviour};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::config::GossipConfig;

/// Behaviour of a hub instance in the bridge mesh: gossipsub for room
/// payloads, identify for address exchange, ping for liveness.
#[derive(NetworkBehaviour)]
pub struct BridgeBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

pub fn build_behaviour(
    keypair: &identity::Keypair,
    config: &GossipConfig,
) -> Result<BridgeBehaviour, Box<dyn std::error::Error + Send + Sync>> {
    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .mesh_n(config.mesh_n)
        .mesh_n_low(config.mesh_n_low)
        .mesh_n_high(config.mesh_n_high)
        .heartbeat_interval(Duration::from_secs(1))
        .max_transmit_size(config.max_transmit_size)
        .validation_mode(gossipsub::ValidationMode::Strict)
        .flood_publish(true)
        .message_id_fn(|msg| {
            // Dedup by SHA-256 content hash
            let mut hasher = Sha256::new();
            hasher.update(&msg.data);
            gossipsub::MessageId::from(hasher.finalize().to_vec())
        })
        .build()
        .map_err(|e| format!("invalid gossipsub config: {e:?}"))?;

    let gossipsub = gossipsub::Behaviour::new(
        gossipsub::MessageAuthenticity::Signed(keypair.clone()),
        gossipsub_config,
    )?;

    Ok(BridgeBehaviour {
        gossipsub,
        identify: identify::Behaviour::new(identify::Config::new(
            "/chathub/1.0.0".to_string(),
            keypair.public(),
        )),
        ping: ping::Behaviour::default(),
    })
}
