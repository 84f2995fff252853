//! Bitcoin Core JSON-RPC types
//!
//! Type definitions for the verbose block and mempool shapes returned
//! by `getblock(hash, 2)` and `getrawmempool(true)`. Fields the node may
//! omit (coinbase inputs, non-standard scripts) are optional with serde
//! defaults.

use serde::{Deserialize, Serialize};

/// Block returned by `getblock` at verbosity 2 (full transaction objects).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerboseBlock {
    pub hash: String,
    pub height: u64,
    /// Block timestamp (Unix epoch seconds)
    pub time: u64,
    #[serde(default)]
    pub tx: Vec<RawTransaction>,
}

/// Transaction as embedded in a verbose block response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<RawInput>,
    #[serde(default)]
    pub vout: Vec<RawOutput>,
}

/// Transaction input. Coinbase inputs carry none of these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInput {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(rename = "scriptSig", default)]
    pub script_sig: Option<ScriptSig>,
    #[serde(default)]
    pub sequence: Option<u32>,
}

/// Unlocking script in both disassembled and raw hex form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSig {
    #[serde(default)]
    pub asm: String,
    #[serde(default)]
    pub hex: String,
}

/// Transaction output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOutput {
    /// Output value in BTC, as the verbose response reports it
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

/// Locking script; `address` is present when the node could decode one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub address: Option<String>,
}

/// Entry of the verbose mempool map (`getrawmempool(true)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolEntry {
    #[serde(default)]
    pub fees: MempoolFees,
    /// Virtual size in vbytes
    pub vsize: u64,
    /// Time the transaction entered the pool (Unix epoch seconds)
    pub time: u64,
    /// Chain height when the transaction entered the pool
    pub height: u64,
    /// Txids this transaction depends on for confirmation, in order
    #[serde(default)]
    pub depends: Vec<String>,
}

/// Fee breakdown of a mempool entry, in BTC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MempoolFees {
    #[serde(default)]
    pub base: f64,
    #[serde(default)]
    pub modified: f64,
    #[serde(default)]
    pub ancestor: f64,
    #[serde(default)]
    pub descendant: f64,
}
