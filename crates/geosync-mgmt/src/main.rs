use anyhow::Result;
use clap::Parser;
use geosync_mgmt::{MgmtConfig, SyncApi};
use geosync_repl::engine::SyncEngine;
use geosync_repl::link::MemRouter;
use geosync_repl::queue::MemQueue;
use geosync_repl::store::MemStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gs-mgmt")]
#[command(about = "GeoSync replication engine and operator API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "/etc/geosync/mgmt.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        MgmtConfig::from_file(&cli.config)?
    } else {
        tracing::warn!(
            "Config file not found, using defaults: {}",
            cli.config.display()
        );
        MgmtConfig::default()
    };
    config.sync.apply_vars(|key| std::env::var(key).ok());

    // Single-node reference wiring; a multi-region deployment swaps in
    // store/queue/router implementations backed by its own infrastructure.
    let store = Arc::new(MemStore::new());
    let queue = Arc::new(MemQueue::new(config.sync.retry));
    let router = Arc::new(MemRouter::new());

    let engine = SyncEngine::start(config.sync.clone(), store, queue, router).await?;
    let api = SyncApi::new(engine.clone(), Arc::new(config));

    tokio::select! {
        result = api.serve() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            engine.shutdown().await;
        }
    }

    Ok(())
}
