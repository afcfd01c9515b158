//! Avatar Sync - scheduled batch refresh of the committer avatar cache
//!
//! Reconciles the committer roster against the local avatar directory,
//! re-downloading anything stale or missing. Invoked on a schedule by an
//! external trigger; always exits 0 so a partial avatar failure never
//! breaks the surrounding build/deploy pipeline.

use avatar_cache::{
    default_ttl, load_roster, FileMetadataStore, Reconciler, RemoteFetcher,
    DEFAULT_AVATAR_HOST, DEFAULT_FETCH_TIMEOUT_SECS,
};
use chrono::Duration;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Clone)]
struct SyncConfig {
    avatar_dir: PathBuf,
    metadata_file: PathBuf,
    roster_file: PathBuf,
    avatar_host: String,
    ttl: Duration,
    fetch_timeout: std::time::Duration,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("avatar_sync=info".parse().expect("valid directive"))
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

    let force = std::env::args().any(|arg| arg == "--force");
    let config = load_config();

    info!("Starting avatar sync...");
    info!("Avatar dir: {:?}", config.avatar_dir);
    info!("Roster: {:?}", config.roster_file);
    if force {
        info!("Force refresh requested, TTL ignored");
    }

    // Errors are logged, never surfaced as a process failure.
    if let Err(e) = run(&config, force).await {
        error!(error = %e, "Avatar sync did not complete");
    }
}

async fn run(config: &SyncConfig, force: bool) -> avatar_cache::Result<()> {
    let roster = load_roster(&config.roster_file).await?;
    info!(committers = roster.len(), "Loaded roster");

    let fetcher =
        RemoteFetcher::with_base_url(&config.avatar_host).with_timeout(config.fetch_timeout);
    let store = FileMetadataStore::new(&config.metadata_file);
    let reconciler = Reconciler::new(fetcher, store, &config.avatar_dir, config.ttl);

    let summary = reconciler.reconcile(&roster, force).await?;
    info!(
        total = summary.total,
        downloaded = summary.downloaded,
        skipped = summary.skipped,
        failed = summary.failed,
        "Avatar sync finished"
    );
    Ok(())
}

fn load_config() -> SyncConfig {
    let avatar_dir = std::env::var("AVATAR_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./public/avatars"));

    let metadata_file = std::env::var("METADATA_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| avatar_dir.join("avatar-metadata.json"));

    let roster_file = std::env::var("ROSTER_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./committers.json"));

    let avatar_host =
        std::env::var("AVATAR_HOST").unwrap_or_else(|_| DEFAULT_AVATAR_HOST.to_string());

    let ttl = std::env::var("AVATAR_TTL_DAYS")
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .map(Duration::days)
        .unwrap_or_else(default_ttl);

    let fetch_timeout = std::env::var("FETCH_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(std::time::Duration::from_secs)
        .unwrap_or(std::time::Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS));

    SyncConfig {
        avatar_dir,
        metadata_file,
        roster_file,
        avatar_host,
        ttl,
        fetch_timeout,
    }
}
