//! Folio server — serves portfolio collections over WebSocket, or watches a
//! remote collection through `ResilientCollectionSync`.
//!
//! ```text
//! folio-server serve [bind_addr] [seed.json]
//! folio-server watch <url> <collection> [fallback.json]
//! ```
//!
//! `RUST_LOG` controls verbosity; `FOLIO_*` variables tune the watcher's
//! retry policy.

mod seed;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use folio_core::FallbackDataset;
use folio_sync::{
    CollectionServer, MemoryBackend, OnlineSignal, RemoteBackend, ResilientCollectionSync,
    ServerConfig, SyncConfig, SyncOptions,
};
use log::info;
use serde_json::Value;

type BoxError = Box<dyn Error + Send + Sync>;

/// Folio collection server and watcher
#[derive(Parser, Debug)]
#[command(name = "folio-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve in-memory collections over WebSocket
    Serve {
        /// Address to listen on [default: 127.0.0.1:9090]
        bind_addr: Option<String>,
        /// JSON seed file mapping collection names to documents
        seed: Option<PathBuf>,
    },
    /// Log every change to a remote collection until interrupted
    Watch {
        /// Server URL, e.g. ws://127.0.0.1:9090
        url: String,
        /// Collection name
        collection: String,
        /// JSON array of documents to show when the server is unreachable
        fallback: Option<PathBuf>,
    },
}

async fn serve(bind_addr: Option<String>, seed_path: Option<PathBuf>) -> Result<(), BoxError> {
    let backend = Arc::new(MemoryBackend::new());
    if let Some(path) = seed_path {
        let loaded = seed::load_seed_file(&backend, &path)?;
        info!("Loaded {loaded} documents from {}", path.display());
    }

    let mut config = ServerConfig::default();
    if let Some(bind_addr) = bind_addr {
        config.bind_addr = bind_addr;
    }
    let server = CollectionServer::new(config, backend);

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

async fn watch(url: String, collection: String, fallback_path: Option<PathBuf>) -> Result<(), BoxError> {
    let config = SyncConfig::from_env()?;
    let fallback = match fallback_path {
        Some(path) => FallbackDataset::<Value>::from_json_file(collection.as_str(), path)?,
        None => FallbackDataset::empty(collection.as_str()),
    };
    let options = SyncOptions::new(collection.as_str(), collection.as_str())
        .fallback(fallback.items().to_vec());

    let mut sync = ResilientCollectionSync::start(
        Arc::new(RemoteBackend::new(url)),
        OnlineSignal::online(),
        config,
        options,
    );
    let mut rx = sync.subscribe();

    loop {
        {
            let view = rx.borrow_and_update();
            info!(
                "{collection}: state={} source={:?} loading={} documents={}",
                view.state,
                view.source,
                view.loading,
                view.data.len()
            );
            if let Some(error) = &view.error {
                log::warn!("{collection}: {error}");
            }
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sync.teardown();
    Ok(())
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    match cli.command {
        Command::Serve { bind_addr, seed } => serve(bind_addr, seed).await,
        Command::Watch {
            url,
            collection,
            fallback,
        } => watch(url, collection, fallback).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::init();

    if let Err(e) = run(cli).await {
        log::error!("{e}");
        eprintln!("{e}");
        std::process::exit(1);
    }
}
