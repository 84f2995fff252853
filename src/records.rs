//! Persisted record types
//!
//! These structs represent the data stored in the transaction index.
//! They use postcard for binary serialization, which is compact and
//! deterministic; the serde field renames only matter on the JSON
//! surface (webhook payloads).

use crate::types::MempoolFees;
use serde::{Deserialize, Serialize};

/// A deduplicated transaction record, keyed by txid.
///
/// The two variants are never merged: the first sighting decides the
/// shape, and only a block sighting may replace a mempool one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionRecord {
    Mempool(MempoolRecord),
    Block(BlockRecord),
}

impl TransactionRecord {
    pub fn tx_hash(&self) -> &str {
        match self {
            TransactionRecord::Mempool(r) => &r.tx_hash,
            TransactionRecord::Block(r) => &r.tx_hash,
        }
    }
}

/// Transaction observed in the unconfirmed pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolRecord {
    pub tx_hash: String,
    pub fees: MempoolFees,
    /// Virtual size in vbytes
    pub size: u64,
    /// Time observed entering the pool (Unix epoch seconds)
    pub time: u64,
    /// Chain height when the transaction entered the pool
    pub height: u64,
    /// Txids this transaction depends on for confirmation
    pub depends: Vec<String>,
}

/// Transaction observed in a mined block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub tx_hash: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Block timestamp (Unix epoch seconds)
    pub time: u64,
    pub block_height: u64,
    pub block_hash: String,
    /// Starts at 1 on first block sighting, recomputed on re-sightings
    pub confirmations: u64,
}

/// Input of a block transaction with its resolved spender address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub spent_txid: Option<String>,
    pub spent_index: Option<u32>,
    pub unlocking_script: Option<String>,
    pub sequence: Option<u32>,
    pub resolved_address: Option<String>,
}

/// Output of a block transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    /// Output value in BTC
    pub value: f64,
    pub index: u32,
    /// Locking script hex
    pub destination_script: String,
    pub resolved_address: Option<String>,
}

/// Direction filter for monitored-address notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "ALL")]
    All,
    #[serde(rename = "DEPOSIT")]
    Deposit,
    #[serde(rename = "TRANSFER")]
    Transfer,
}

/// An address registered for webhook notification, keyed by address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredAddress {
    pub address: String,
    pub transaction_type: TransactionType,
    pub webhook_url: String,
    /// 0 means "notify immediately at first sighting"
    #[serde(default)]
    pub maximum_confirmations: u64,
}
