//! `blobpackd`: serves one BlobPack store over the sync and blob-transport
//! HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blobpack_store::BlobStore;
use blobpack_sync::{DaemonConfig, SyncApi};

#[derive(Parser)]
#[command(name = "blobpackd")]
#[command(about = "BlobPack storage daemon", long_about = None)]
struct Args {
    /// Path to the daemon config file (TOML or JSON).
    #[arg(short, long, default_value = "blobpackd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = if args.config.exists() {
        DaemonConfig::from_file(&args.config)?
    } else {
        tracing::warn!(
            "config file not found, using defaults: {}",
            args.config.display()
        );
        DaemonConfig::default()
    };

    tracing::info!(
        dir = %config.store.dir.display(),
        namespace = %config.namespace,
        "opening store"
    );
    let store = Arc::new(BlobStore::open(config.store.clone())?);
    let api = Arc::new(SyncApi::new(
        store,
        config.namespace.clone(),
        config.api_key.clone(),
    ));
    api.serve(config.bind_addr).await
}
