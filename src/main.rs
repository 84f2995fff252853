//! Bitcoin transaction indexer binary
//!
//! Polls a Bitcoin node for mempool snapshots and new blocks, indexes
//! transactions into RocksDB, and dispatches webhook notifications for
//! monitored addresses.

use anyhow::{Context, Result};
use bitwatch::config::PollerSettings;
use bitwatch::monitor::{AddressMonitor, WebhookDispatcher};
use bitwatch::poller::ChainPoller;
use bitwatch::processor::TransactionProcessor;
use bitwatch::queue::{spawn_dispatcher, InProcessQueue, JobSink, RetryPolicy};
use bitwatch::rpc::{BitcoinRpcClient, ChainRpc};
use bitwatch::store::{RocksStore, Store};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Bitcoin chain-monitoring transaction indexer
#[derive(Parser)]
#[command(name = "bitwatch")]
#[command(about = "Index mempool and block transactions, notify monitored addresses")]
struct Args {
    /// Bitcoin node JSON-RPC endpoint
    #[arg(short, long, default_value = "http://127.0.0.1:18332")]
    rpc_url: String,

    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./index_db")]
    db_path: PathBuf,

    /// Seconds between poll iterations
    #[arg(long, default_value_t = 10)]
    poll_interval_secs: u64,

    /// Seconds to back off after a failed poll iteration
    #[arg(long, default_value_t = 30)]
    error_cooldown_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting Bitcoin transaction indexer");
    info!("RPC URL: {}", args.rpc_url);
    info!("Database: {:?}", args.db_path);

    let store: Arc<dyn Store> = Arc::new(
        RocksStore::open(&args.db_path)
            .with_context(|| format!("Failed to open database at {:?}", args.db_path))?,
    );
    let rpc: Arc<dyn ChainRpc> = Arc::new(BitcoinRpcClient::new(args.rpc_url));

    let (queue, receiver) = InProcessQueue::new();
    let queue: Arc<dyn JobSink> = Arc::new(queue);

    let monitor = AddressMonitor::new(store.clone(), WebhookDispatcher::new());
    let processor = Arc::new(TransactionProcessor::new(
        store.clone(),
        rpc.clone(),
        queue.clone(),
        monitor,
    ));
    spawn_dispatcher(receiver, processor, RetryPolicy::default());

    let settings = PollerSettings::from_secs(args.poll_interval_secs, args.error_cooldown_secs);
    let mut poller = ChainPoller::new(rpc, store, queue, settings);
    poller
        .initialize()
        .await
        .context("Failed to initialize poller")?;

    tokio::select! {
        result = poller.run() => {
            result.context("Poller error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    info!("Indexer stopped");
    Ok(())
}
