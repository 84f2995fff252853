//! JSON-RPC client for Bitcoin nodes
//!
//! Provides a typed interface to the four node calls the pipeline
//! depends on. Every call builds its own immutable request body; any
//! response carrying a non-null `error` field is raised as an error,
//! except "height out of range" which is a wait signal, not a failure.

use crate::types::{MempoolEntry, VerboseBlock};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Node error code returned by `getblockhash` for a height beyond the tip.
const ERR_BLOCK_HEIGHT_OUT_OF_RANGE: i64 = -8;

/// The chain RPC operations the poller and gap-fill handler depend on.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Height of the current chain tip.
    async fn get_block_count(&self) -> Result<u64>;

    /// Hash of the block at `height`, or `None` if it is not mined yet.
    async fn get_block_hash(&self, height: u64) -> Result<Option<String>>;

    /// Full block with transaction objects (verbosity 2).
    async fn get_block(&self, hash: &str) -> Result<VerboseBlock>;

    /// Verbose mempool snapshot: txid to entry.
    async fn get_raw_mempool(&self) -> Result<HashMap<String, MempoolEntry>>;
}

/// JSON-RPC client for a Bitcoin node endpoint.
pub struct BitcoinRpcClient {
    client: reqwest::Client,
    url: String,
}

impl BitcoinRpcClient {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Make a JSON-RPC call, returning the raw `result` value.
    ///
    /// Node-reported errors come back as `RpcNodeError` so callers can
    /// inspect the protocol error code.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Failed to send RPC request")?;

        let body: Value = response
            .json()
            .await
            .context("Failed to parse RPC response")?;

        if let Some(error) = body.get("error") {
            if !error.is_null() {
                return Err(node_error(error));
            }
        }

        body.get("result")
            .cloned()
            .context("RPC response missing 'result' field")
    }
}

/// Node-reported RPC error, carrying the protocol error code.
#[derive(Debug)]
struct RpcNodeError {
    code: i64,
}

impl std::fmt::Display for RpcNodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node error code {}", self.code)
    }
}

impl std::error::Error for RpcNodeError {}

/// Wrap a non-null `error` field as a downcastable `RpcNodeError`, with
/// the full error object preserved in the context message.
fn node_error(error: &Value) -> anyhow::Error {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    anyhow::Error::new(RpcNodeError { code }).context(format!("RPC error: {}", error))
}

#[async_trait]
impl ChainRpc for BitcoinRpcClient {
    async fn get_block_count(&self) -> Result<u64> {
        let result = self.call("getblockcount", json!([])).await?;
        result
            .as_u64()
            .context("Block count response is not an integer")
    }

    async fn get_block_hash(&self, height: u64) -> Result<Option<String>> {
        match self.call("getblockhash", json!([height])).await {
            Ok(result) => {
                let hash = result
                    .as_str()
                    .context("Block hash response is not a string")?;
                Ok(Some(hash.to_string()))
            }
            Err(err) => {
                let out_of_range = err
                    .downcast_ref::<RpcNodeError>()
                    .map_or(false, |e| e.code == ERR_BLOCK_HEIGHT_OUT_OF_RANGE);
                if out_of_range {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn get_block(&self, hash: &str) -> Result<VerboseBlock> {
        let result = self.call("getblock", json!([hash, 2])).await?;
        serde_json::from_value(result).context("Failed to deserialize block")
    }

    async fn get_raw_mempool(&self) -> Result<HashMap<String, MempoolEntry>> {
        let result = self.call("getrawmempool", json!([true])).await?;
        serde_json::from_value(result).context("Failed to deserialize mempool")
    }
}


/// Scripted in-memory node used by poller and processor tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::types::{RawOutput, RawTransaction, ScriptPubKey};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeRpc {
        pub tip: Mutex<u64>,
        /// Blocks by height; heights above the tip report "not mined".
        pub blocks: Mutex<HashMap<u64, VerboseBlock>>,
        pub mempool: Mutex<HashMap<String, MempoolEntry>>,
    }

    impl FakeRpc {
        pub fn with_tip(tip: u64) -> Self {
            let rpc = Self::default();
            *rpc.tip.lock().unwrap() = tip;
            rpc
        }

        pub fn add_block(&self, block: VerboseBlock) {
            self.blocks.lock().unwrap().insert(block.height, block);
        }

        pub fn simple_block(height: u64) -> VerboseBlock {
            VerboseBlock {
                hash: format!("hash-{height}"),
                height,
                time: 1700000000 + height,
                tx: vec![RawTransaction {
                    txid: format!("tx-{height}"),
                    vin: vec![],
                    vout: vec![RawOutput {
                        value: 0.25,
                        n: 0,
                        script_pub_key: ScriptPubKey {
                            hex: "76a9".into(),
                            address: None,
                        },
                    }],
                }],
            }
        }
    }

    #[async_trait]
    impl ChainRpc for FakeRpc {
        async fn get_block_count(&self) -> Result<u64> {
            Ok(*self.tip.lock().unwrap())
        }

        async fn get_block_hash(&self, height: u64) -> Result<Option<String>> {
            if height > *self.tip.lock().unwrap() {
                return Ok(None);
            }
            Ok(self
                .blocks
                .lock()
                .unwrap()
                .get(&height)
                .map(|b| b.hash.clone()))
        }

        async fn get_block(&self, hash: &str) -> Result<VerboseBlock> {
            self.blocks
                .lock()
                .unwrap()
                .values()
                .find(|b| b.hash == hash)
                .cloned()
                .with_context(|| format!("unknown block {hash}"))
        }

        async fn get_raw_mempool(&self) -> Result<HashMap<String, MempoolEntry>> {
            Ok(self.mempool.lock().unwrap().clone())
        }
    }
}
