//! Avatar Server - save boundary for client-pushed avatar refreshes
//!
//! Accepts avatar blobs fetched client-side during page visits and
//! persists them into the shared avatar directory, keeping the
//! authoritative metadata file consistent.

mod server;

use avatar_cache::FileMetadataStore;
use server::{start_server, ServerState, SharedState};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Clone)]
struct ServerConfig {
    port: u16,
    avatar_dir: PathBuf,
    metadata_file: PathBuf,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("avatar_server=info".parse().expect("valid directive"))
        .add_directive("avatar_cache=info".parse().expect("valid directive"));

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting avatar save boundary...");

    let config = load_config();
    info!("Port: {}", config.port);
    info!("Avatar dir: {:?}", config.avatar_dir);

    let store = FileMetadataStore::new(&config.metadata_file);
    let state: SharedState = Arc::new(ServerState::new(config.avatar_dir, store));

    start_server(state, config.port).await
}

fn load_config() -> ServerConfig {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3002);

    let avatar_dir = std::env::var("AVATAR_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./public/avatars"));

    let metadata_file = std::env::var("METADATA_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| avatar_dir.join("avatar-metadata.json"));

    ServerConfig {
        port,
        avatar_dir,
        metadata_file,
    }
}
