use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use chathub_server::bridge::{BridgeBackend, GossipPubSub, MemoryPubSub, PubSub};
use chathub_server::chat::ChatStore;
use chathub_server::collab::HttpIdentityClient;
use chathub_server::config::{generate_config_template, Cli, Config};
use chathub_server::hub::Hub;
use chathub_server::{db, routes, state};

/// Bound on each outbound call to the identity services.
const IDENTITY_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Handle --generate-config: print template and exit
    if cli.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load(&cli)?;

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chathub_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("chathub server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;
    let store = ChatStore::new(db);

    let identity = HttpIdentityClient::new(
        &config.auth_service_url,
        &config.user_service_url,
        IDENTITY_HTTP_TIMEOUT,
    )?;

    // Cross-instance bridge
    let bridge: Arc<dyn PubSub> = match config.bridge.backend {
        BridgeBackend::Memory => {
            tracing::info!("Bridge: in-memory (single instance)");
            Arc::new(MemoryPubSub::new(config.bridge.channel_capacity))
        }
        BridgeBackend::Gossip => {
            let gossip = GossipPubSub::start(
                &config.bridge.gossip,
                &config.data_dir,
                config.bridge.channel_capacity,
            )
            .await?;
            tracing::info!(
                peer_id = %gossip.peer_id(),
                peers = config.bridge.gossip.peers.len(),
                "Bridge: gossipsub mesh"
            );
            Arc::new(gossip)
        }
    };

    let hub = Hub::new(config.hub.clone(), bridge, &config.bridge.topic_prefix);
    let _presence_sync = hub.start_presence_sync().await?;
    let app_state = state::AppState::new(hub, Arc::new(identity), store);

    let app = routes::build_router(app_state, config.rate_limit.as_ref());

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
