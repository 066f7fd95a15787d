use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bridge::BridgeConfig;

/// Command-line flags. Only flags actually given override lower layers.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "chathub-server", version, about = "Real-time chat transport hub")]
pub struct Cli {
    /// Path to TOML config file
    #[arg(long, default_value = "./chathub.toml")]
    #[serde(skip)]
    pub config: String,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub json_logs: bool,

    /// Data directory for persistent state (DB, bridge key)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Base URL of the token validation service
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_service_url: Option<String>,

    /// Base URL of the user profile service
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_service_url: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Effective server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default)]
    pub json_logs: bool,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_auth_service_url")]
    pub auth_service_url: String,

    #[serde(default = "default_user_service_url")]
    pub user_service_url: String,

    /// Connection hub tuning (`[hub]` section)
    #[serde(default)]
    pub hub: HubConfig,

    /// Cross-instance bridge (`[bridge]` section)
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Per-IP rate limit on WebSocket handshakes (`[rate_limit]` section).
    /// Absent disables limiting.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            json_logs: false,
            data_dir: default_data_dir(),
            auth_service_url: default_auth_service_url(),
            user_service_url: default_user_service_url(),
            hub: HubConfig::default(),
            bridge: BridgeConfig::default(),
            rate_limit: Some(RateLimitConfig::default()),
        }
    }
}

/// Tuning knobs of the connection hub. All durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Outbound queue capacity per connection. A full queue evicts the peer.
    /// Default: 256
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Inbound frames larger than this are discarded.
    /// Default: 65536
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Read deadline, refreshed by every inbound frame or pong.
    /// Default: 60000
    #[serde(default = "default_pong_wait_ms")]
    pub pong_wait_ms: u64,

    /// Keepalive ping interval. Clamped below `pong_wait_ms`.
    /// Default: 54000
    #[serde(default = "default_ping_period_ms")]
    pub ping_period_ms: u64,

    /// Write deadline for targeted pushes to presence connections.
    /// Default: 10000
    #[serde(default = "default_push_deadline_ms")]
    pub push_deadline_ms: u64,

    /// How long the bridge forwarder waits for queue space before evicting.
    /// Default: 1000
    #[serde(default = "default_bridge_wait_ms")]
    pub bridge_wait_ms: u64,

    /// Bound on each identity/membership call during the handshake.
    /// Default: 5000
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Delay before an OFFLINE transition is committed. 0 commits immediately.
    /// Default: 0
    #[serde(default)]
    pub presence_grace_ms: u64,

    /// Interval between full presence snapshots sent to sibling instances.
    /// A sibling silent for three intervals is treated as gone. 0 disables
    /// snapshots and expiry; transitions are still shared.
    /// Default: 15000
    #[serde(default = "default_presence_sync_ms")]
    pub presence_sync_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            max_frame_bytes: default_max_frame_bytes(),
            pong_wait_ms: default_pong_wait_ms(),
            ping_period_ms: default_ping_period_ms(),
            push_deadline_ms: default_push_deadline_ms(),
            bridge_wait_ms: default_bridge_wait_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            presence_grace_ms: 0,
            presence_sync_ms: default_presence_sync_ms(),
        }
    }
}

impl HubConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms.max(1))
    }

    /// Ping period, always strictly shorter than the read deadline.
    pub fn ping_period(&self) -> Duration {
        let pong_wait = self.pong_wait_ms.max(1);
        let period = if self.ping_period_ms == 0 || self.ping_period_ms >= pong_wait {
            pong_wait * 9 / 10
        } else {
            self.ping_period_ms
        };
        Duration::from_millis(period.max(1))
    }

    pub fn push_deadline(&self) -> Duration {
        Duration::from_millis(self.push_deadline_ms)
    }

    pub fn bridge_wait(&self) -> Duration {
        Duration::from_millis(self.bridge_wait_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn presence_grace(&self) -> Duration {
        Duration::from_millis(self.presence_grace_ms)
    }

    pub fn presence_sync(&self) -> Option<Duration> {
        (self.presence_sync_ms > 0).then(|| Duration::from_millis(self.presence_sync_ms))
    }
}

/// Token bucket for handshake rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Seconds per replenished token.
    /// Default: 1
    #[serde(default = "default_per_second")]
    pub per_second: u64,

    /// Bucket size.
    /// Default: 30
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

fn default_port() -> u16 {
    8085
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_auth_service_url() -> String {
    "http://localhost:8081".to_string()
}
fn default_user_service_url() -> String {
    "http://localhost:8082".to_string()
}
fn default_outbound_buffer() -> usize {
    256
}
fn default_max_frame_bytes() -> usize {
    65536
}
fn default_pong_wait_ms() -> u64 {
    60_000
}
fn default_ping_period_ms() -> u64 {
    54_000
}
fn default_push_deadline_ms() -> u64 {
    10_000
}
fn default_bridge_wait_ms() -> u64 {
    1_000
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_presence_sync_ms() -> u64 {
    15_000
}
fn default_per_second() -> u64 {
    1
}
fn default_burst_size() -> u32 {
    30
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATHUB_*) < CLI args
    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("CHATHUB_").split("__"))
            .merge(Serialized::defaults(cli.clone()))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# chathub-server configuration
# Place this file at ./chathub.toml or specify with --config <path>
# Settings can be overridden via environment variables (CHATHUB_PORT,
# CHATHUB_HUB__OUTBOUND_BUFFER, ...) or CLI flags (--port, ...)

# Server port (default: 8085)
# port = 8085

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and the bridge node key
# data_dir = "./data"

# Identity collaborators
# auth_service_url = "http://localhost:8081"   # POST /auth/validate
# user_service_url = "http://localhost:8082"   # GET /users/{id}

# ---- Connection hub ----
# [hub]
# outbound_buffer = 256          # queued frames per connection before eviction
# max_frame_bytes = 65536        # larger inbound frames are discarded
# pong_wait_ms = 60000           # read deadline
# ping_period_ms = 54000         # keepalive ping, must be below pong_wait_ms
# push_deadline_ms = 10000       # write deadline for notification pushes
# bridge_wait_ms = 1000          # bridge forwarder wait before eviction
# handshake_timeout_ms = 5000    # bound on identity/membership calls
# presence_grace_ms = 0          # delay OFFLINE to absorb reconnects (e.g. 2000)
# presence_sync_ms = 15000       # presence snapshot interval between instances

# ---- Cross-instance bridge ----
# [bridge]
# backend = "memory"             # "memory" (single instance) or "gossip"
# topic_prefix = "chat"
# channel_capacity = 1024

# [bridge.gossip]
# listen_port = 7946
# peers = ["/dns4/chat-2/tcp/7946"]
# mesh_n = 4
# mesh_n_low = 3
# mesh_n_high = 8
# max_transmit_size = 65536

# ---- Handshake rate limiting (per peer IP) ----
# [rate_limit]
# per_second = 1                 # one token replenished every N seconds
# burst_size = 30
"#
    .to_string()
}
