use serde::{Deserialize, Serialize};

/// Which pub/sub transport connects this instance to its siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeBackend {
    /// Process-local only. Correct for a single instance.
    #[default]
    Memory,
    /// libp2p gossipsub mesh between instances.
    Gossip,
}

/// Bridge configuration, `[bridge]` in `chathub.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub backend: BridgeBackend,

    /// Room topics are named `{topic_prefix}:{room_id}`.
    /// Default: "chat"
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Per-topic buffer before a slow local subscriber starts lagging.
    /// Default: 1024
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub gossip: GossipConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend: BridgeBackend::default(),
            topic_prefix: default_topic_prefix(),
            channel_capacity: default_channel_capacity(),
            gossip: GossipConfig::default(),
        }
    }
}

/// Gossipsub mesh configuration, `[bridge.gossip]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// TCP port for the libp2p listener (separate from the HTTP port).
    /// Default: 7946
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Multiaddrs of sibling instances to dial at startup,
    /// e.g. "/dns4/chat-2/tcp/7946".
    #[serde(default)]
    pub peers: Vec<String>,

    /// Gossipsub mesh degree (D).
    /// Default: 4
    #[serde(default = "default_mesh_n")]
    pub mesh_n: usize,

    /// Mesh low watermark (D_lo).
    /// Default: 3
    #[serde(default = "default_mesh_n_low")]
    pub mesh_n_low: usize,

    /// Mesh high watermark (D_hi).
    /// Default: 8
    #[serde(default = "default_mesh_n_high")]
    pub mesh_n_high: usize,

    /// Largest payload in bytes.
    /// Default: 65536
    #[serde(default = "default_max_transmit_size")]
    pub max_transmit_size: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            peers: Vec::new(),
            mesh_n: default_mesh_n(),
            mesh_n_low: default_mesh_n_low(),
            mesh_n_high: default_mesh_n_high(),
            max_transmit_size: default_max_transmit_size(),
        }
    }
}

fn default_topic_prefix() -> String {
    "chat".to_string()
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_listen_port() -> u16 {
    7946
}
fn default_mesh_n() -> usize {
    4
}
fn default_mesh_n_low() -> usize {
    3
}
fn default_mesh_n_high() -> usize {
    8
}
fn default_max_transmit_size() -> usize {
    65536
}
