//! # Fairway Sync Daemon
//!
//! Runs the sync agent against the configured API until Ctrl-C.
//!
//! ## Usage
//! ```bash
//! # Default config location (platform config dir / fairway-sync.toml)
//! cargo run -p fairway-sync --bin fairway-syncd
//!
//! # Explicit config file
//! cargo run -p fairway-sync --bin fairway-syncd -- --config ./fairway-sync.toml
//!
//! # More logging
//! RUST_LOG=debug cargo run -p fairway-sync --bin fairway-syncd
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fairway_store::{FileStore, LocalStore, MemoryStore};
use fairway_sync::{
    AgentConfig, ApiClient, EventBus, HttpRemoteStore, NetworkMonitor, RemoteStore,
    ReqwestTransport, SyncAgent, SyncConfig, SyncEngine, SyncEvent, UnconfiguredRemote,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fairway_sync=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Fairway POS Sync Daemon");
                println!();
                println!("Usage: fairway-syncd [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => warn!(arg = other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => SyncConfig::load(Some(path))?,
        None => SyncConfig::load_or_default(None),
    };
    info!(device = config.device_id(), api = ?config.api_url(), "Fairway sync daemon starting");

    let store: Arc<dyn LocalStore> = match config.data_dir() {
        Some(dir) => {
            info!(dir = %dir.display(), "Using file store");
            Arc::new(FileStore::open(dir)?)
        }
        None => {
            warn!("No data directory available, state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let events = EventBus::new();
    let network = NetworkMonitor::new(true, events.clone());
    let transport = ReqwestTransport::new(Duration::from_millis(config.api.max_timeout_ms))?;

    let api = ApiClient::builder(config.api.clone())
        .transport(Arc::new(transport))
        .store(store.clone())
        .network(network.clone())
        .events(events.clone())
        .build()?;

    let remote: Arc<dyn RemoteStore> = if config.api_url().is_some() {
        Arc::new(HttpRemoteStore::new(
            api.clone(),
            Duration::from_secs(config.sync.realtime_poll_secs),
        ))
    } else {
        warn!("No API URL configured, changes will stay pending");
        Arc::new(UnconfiguredRemote)
    };

    let engine = SyncEngine::builder(config.sync.clone())
        .store(store)
        .remote(remote)
        .network(network.clone())
        .events(events.clone())
        .build()?;

    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SyncEvent::ChangeFailed { ref failed } => error!(
                    collection = %failed.change.collection,
                    change_id = %failed.change.id,
                    "Change needs operator attention"
                ),
                ref other => info!(event = other.name(), "Sync event"),
            }
        }
    });

    let agent = SyncAgent::spawn(
        AgentConfig {
            interval: config.sync.sync_interval(),
            realtime: config.sync.realtime,
        },
        engine.clone(),
        Some(api),
        &network,
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    agent.shutdown().await?;
    engine.destroy();
    info!("Fairway sync daemon stopped");
    Ok(())
}
