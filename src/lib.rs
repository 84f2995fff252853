//! bitwatch - Bitcoin chain-monitoring transaction indexer
//!
//! Observes the mempool and newly mined blocks, persists a deduplicated
//! transaction history with confirmation tracking, and notifies webhook
//! subscribers when a transaction touches a monitored address.

pub mod address;
pub mod config;
pub mod keys;
pub mod monitor;
pub mod poller;
pub mod processor;
pub mod queue;
pub mod records;
pub mod registry;
pub mod rpc;
pub mod store;
pub mod types;

// Re-export the main types for convenience
pub use monitor::{AddressMonitor, WebhookDispatcher};
pub use poller::ChainPoller;
pub use processor::TransactionProcessor;
pub use queue::{InProcessQueue, JobPayload, JobSink, RetryPolicy};
pub use records::{BlockRecord, MempoolRecord, MonitoredAddress, TransactionRecord, TransactionType};
pub use rpc::{BitcoinRpcClient, ChainRpc};
pub use store::{BatchCommand, RocksStore, Store};
