// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tally-remote: reference WebSocket peer for the tally sync engine.
//!
//! Holds the authoritative item set in memory, acknowledges client events,
//! resolves concurrent writes with last-write-wins, and broadcasts accepted
//! changes to every other connected client.

mod server;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tally_core::{Fields, Item};

/// tally-remote: authoritative sync peer
#[derive(Parser, Debug)]
#[command(name = "tally-remote")]
#[command(about = "Reference WebSocket peer for the tally sync engine")]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:7890")]
    bind: SocketAddr,

    /// JSON file with an array of items to start from
    #[arg(short, long)]
    seed: Option<PathBuf>,

    /// Field holding each item's id
    #[arg(long, default_value = tally_core::item::DEFAULT_ID_FIELD)]
    id_field: String,

    /// Field holding each item's last-modified timestamp
    #[arg(long, default_value = tally_core::item::DEFAULT_TIMESTAMP_FIELD)]
    timestamp_field: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tally-remote server");
    info!("  Bind address: {}", args.bind);

    let state = state::ServerState::with_fields(Fields::new(args.id_field, args.timestamp_field));

    if let Some(path) = &args.seed {
        let content = std::fs::read_to_string(path)?;
        let items: Vec<Item> = serde_json::from_str(&content)?;
        let count = items.len();
        for item in items {
            state.upsert(item).await?;
        }
        info!("  Seeded {} items from {}", count, path.display());
    }

    server::run(args.bind, state).await?;

    Ok(())
}
