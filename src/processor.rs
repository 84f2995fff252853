//! Transaction processor
//!
//! Consumes ingestion jobs from the queue: normalizes raw mempool and
//! block transaction shapes into canonical records, deduplicates against
//! the store, updates confirmation counts on block re-sightings, and
//! hands first block sightings to the address monitor. Large batches are
//! partitioned into fixed-size chunks processed concurrently; each chunk
//! is written as one atomic batch.

use crate::address::address_from_unlocking_script;
use crate::keys::Bucket;
use crate::monitor::AddressMonitor;
use crate::queue::{JobHandler, JobPayload, JobSink};
use crate::records::{BlockRecord, MempoolRecord, TransactionRecord, TxInput, TxOutput};
use crate::rpc::ChainRpc;
use crate::store::{get_transaction, put_transaction, transaction_put_command, BatchCommand, Store};
use crate::types::{MempoolEntry, RawInput, RawOutput, RawTransaction, VerboseBlock};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Mempool snapshots are processed in chunks of this many transactions.
pub const MEMPOOL_CHUNK_SIZE: usize = 150;

/// Block transaction lists are processed in chunks of this many.
pub const BLOCK_CHUNK_SIZE: usize = 100;

pub struct TransactionProcessor {
    store: Arc<dyn Store>,
    rpc: Arc<dyn ChainRpc>,
    queue: Arc<dyn JobSink>,
    monitor: AddressMonitor,
}

impl TransactionProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        rpc: Arc<dyn ChainRpc>,
        queue: Arc<dyn JobSink>,
        monitor: AddressMonitor,
    ) -> Self {
        Self {
            store,
            rpc,
            queue,
            monitor,
        }
    }

    /// Ingest a verbose mempool snapshot.
    ///
    /// Per-record and per-chunk failures are logged and swallowed: a
    /// malformed entry must not block its sibling chunks, and the
    /// queue-level retry is reserved for infrastructure failures.
    pub async fn process_mempool(&self, entries: HashMap<String, MempoolEntry>) {
        let transactions: Vec<(String, MempoolEntry)> = entries.into_iter().collect();
        info!(count = transactions.len(), "processing mempool snapshot");

        let chunks = transactions
            .chunks(MEMPOOL_CHUNK_SIZE)
            .map(|chunk| self.process_mempool_chunk(chunk));
        for result in join_all(chunks).await {
            if let Err(err) = result {
                error!(error = %err, "mempool chunk failed");
            }
        }
    }

    async fn process_mempool_chunk(&self, chunk: &[(String, MempoolEntry)]) -> Result<()> {
        let mapped = join_all(
            chunk
                .iter()
                .map(|(txid, entry)| self.map_mempool_entry(txid, entry)),
        )
        .await;

        let mut commands = Vec::new();
        for result in mapped {
            match result {
                Ok(Some(command)) => commands.push(command),
                Ok(None) => {} // already recorded, skip
                Err(err) => error!(error = %err, "failed to map mempool transaction"),
            }
        }

        let written = commands.len();
        self.store.batch(commands)?;
        info!(written, "wrote mempool transactions to the store");
        Ok(())
    }

    async fn map_mempool_entry(
        &self,
        txid: &str,
        entry: &MempoolEntry,
    ) -> Result<Option<BatchCommand>> {
        // First writer wins for the mempool path
        if self.store.exists(Bucket::Transactions, txid)? {
            return Ok(None);
        }

        let record = TransactionRecord::Mempool(MempoolRecord {
            tx_hash: txid.to_string(),
            fees: entry.fees.clone(),
            size: entry.vsize,
            time: entry.time,
            height: entry.height,
            depends: entry.depends.clone(),
        });
        Ok(Some(transaction_put_command(&record)?))
    }

    /// Ingest a mined block.
    pub async fn process_block(&self, block: VerboseBlock) {
        info!(
            height = block.height,
            hash = %block.hash,
            count = block.tx.len(),
            "processing block"
        );

        let chunks = block
            .tx
            .chunks(BLOCK_CHUNK_SIZE)
            .map(|chunk| self.process_block_chunk(chunk, &block.hash, block.time, block.height));
        for result in join_all(chunks).await {
            if let Err(err) = result {
                error!(error = %err, "block chunk failed");
            }
        }
    }

    async fn process_block_chunk(
        &self,
        chunk: &[RawTransaction],
        block_hash: &str,
        time: u64,
        block_height: u64,
    ) -> Result<()> {
        let mapped = join_all(
            chunk
                .iter()
                .map(|tx| self.map_block_transaction(tx, block_hash, time, block_height)),
        )
        .await;

        // Re-sightings were updated in place and map to None
        let mut commands = Vec::new();
        for result in mapped {
            match result {
                Ok(Some(command)) => commands.push(command),
                Ok(None) => {}
                Err(err) => error!(error = %err, "failed to map block transaction"),
            }
        }

        let written = commands.len();
        self.store.batch(commands)?;
        info!(written, block_height, "wrote block transactions to the store");
        Ok(())
    }

    async fn map_block_transaction(
        &self,
        tx: &RawTransaction,
        block_hash: &str,
        time: u64,
        block_height: u64,
    ) -> Result<Option<BatchCommand>> {
        match get_transaction(self.store.as_ref(), &tx.txid)? {
            Some(TransactionRecord::Block(existing)) => {
                // Re-sighting: recompute the absolute confirmation count,
                // never re-notify.
                let confirmations = block_height.saturating_sub(existing.block_height) + 1;
                debug!(
                    txid = %tx.txid,
                    confirmations,
                    "updating confirmations for recorded transaction"
                );
                let updated = BlockRecord {
                    confirmations,
                    ..existing
                };
                put_transaction(self.store.as_ref(), &TransactionRecord::Block(updated))?;
                return Ok(None);
            }
            Some(TransactionRecord::Mempool(_)) => {
                // The transaction was mined after we saw it unconfirmed;
                // the block variant wins and replaces the mempool record.
                debug!(txid = %tx.txid, "block sighting replaces mempool record");
            }
            None => {}
        }

        let record = BlockRecord {
            tx_hash: tx.txid.clone(),
            inputs: resolve_inputs(&tx.vin),
            outputs: map_outputs(&tx.vout),
            time,
            block_height,
            block_hash: block_hash.to_string(),
            confirmations: 1,
        };

        self.monitor.inspect(&record).await;

        Ok(Some(transaction_put_command(&TransactionRecord::Block(
            record,
        ))?))
    }

    /// Walk a missed height range sequentially, enqueueing each block as
    /// an ordinary block job. Sequential on purpose: gap recovery must
    /// not multiply RPC pressure. All failures propagate so the queue
    /// retries the whole range, including a height the node claims is
    /// not mined (the range was at or below the tip when enqueued);
    /// re-delivery is safe because ingestion is idempotent.
    pub async fn process_block_range(&self, from: u64, to: u64) -> Result<()> {
        info!(from, to, "recovering missed blocks");
        for height in from..=to {
            match self.rpc.get_block_hash(height).await? {
                Some(hash) => {
                    let block = self.rpc.get_block(&hash).await?;
                    self.queue.enqueue(JobPayload::Block { block })?;
                }
                None => {
                    warn!(height, "block not available during gap recovery");
                    anyhow::bail!("block at height {height} unavailable during gap recovery");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for TransactionProcessor {
    async fn handle(&self, job: JobPayload) -> Result<()> {
        match job {
            JobPayload::Mempool { entries } => {
                self.process_mempool(entries).await;
                Ok(())
            }
            JobPayload::Block { block } => {
                self.process_block(block).await;
                Ok(())
            }
            JobPayload::BlockRange { from, to } => self.process_block_range(from, to).await,
        }
    }
}

/// Resolve spender addresses from unlocking scripts, dropping inputs
/// whose address cannot be resolved (coinbase, non-P2PKH).
fn resolve_inputs(vin: &[RawInput]) -> Vec<TxInput> {
    vin.iter()
        .filter_map(|input| {
            let script = input.script_sig.as_ref()?;
            let address = address_from_unlocking_script(&script.asm)?;
            Some(TxInput {
                spent_txid: input.txid.clone(),
                spent_index: input.vout,
                unlocking_script: Some(script.asm.clone()),
                sequence: input.sequence,
                resolved_address: Some(address),
            })
        })
        .collect()
}

/// Carry outputs through with the address the node already decoded.
fn map_outputs(vout: &[RawOutput]) -> Vec<TxOutput> {
    vout.iter()
        .map(|output| TxOutput {
            value: output.value,
            index: output.n,
            destination_script: output.script_pub_key.hex.clone(),
            resolved_address: output.script_pub_key.address.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{testserver, WebhookDispatcher};
    use crate::queue::recording::RecordingSink;
    use crate::records::{MonitoredAddress, TransactionType};
    use crate::rpc::fake::FakeRpc;
    use crate::store::memory::MemoryStore;
    use crate::store::put_monitored_address;
    use crate::types::{MempoolFees, ScriptPubKey, ScriptSig};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const PUBKEY: &str = "0250863ad64a87ae8a2fe83c1af1a8403cb53f53e486d8511dad8a04887e5b2352";
    const PUBKEY_ADDRESS: &str = "n3svudhm7bt6j3nTT9uu1A57Cs9pKK3iXW";

    struct Fixture {
        store: Arc<MemoryStore>,
        rpc: Arc<FakeRpc>,
        sink: Arc<RecordingSink>,
        processor: TransactionProcessor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let rpc = Arc::new(FakeRpc::default());
        let sink = Arc::new(RecordingSink::new());
        let monitor = AddressMonitor::new(
            store.clone(),
            WebhookDispatcher::with_policy(1, Duration::from_millis(1)),
        );
        let processor = TransactionProcessor::new(store.clone(), rpc.clone(), sink.clone(), monitor);
        Fixture {
            store,
            rpc,
            sink,
            processor,
        }
    }

    fn mempool_entry(height: u64) -> MempoolEntry {
        MempoolEntry {
            fees: MempoolFees {
                base: 0.0001,
                ..MempoolFees::default()
            },
            vsize: 215,
            time: 1700000123,
            height,
            depends: vec![],
        }
    }

    fn mempool_snapshot(count: usize) -> HashMap<String, MempoolEntry> {
        (0..count)
            .map(|i| (format!("tx-{i:04}"), mempool_entry(2499999)))
            .collect()
    }

    fn block_with_tx(height: u64, tx: RawTransaction) -> VerboseBlock {
        VerboseBlock {
            hash: format!("hash-{height}"),
            height,
            time: 1700000000 + height,
            tx: vec![tx],
        }
    }

    fn spend_tx(txid: &str, output_address: Option<&str>) -> RawTransaction {
        RawTransaction {
            txid: txid.to_string(),
            vin: vec![
                // Coinbase-style input: no script, dropped during resolution
                RawInput {
                    txid: None,
                    vout: None,
                    script_sig: None,
                    sequence: Some(4294967295),
                },
                RawInput {
                    txid: Some("prev-1".into()),
                    vout: Some(0),
                    script_sig: Some(ScriptSig {
                        asm: format!("3044deadbeef01 {PUBKEY}"),
                        hex: String::new(),
                    }),
                    sequence: Some(4294967293),
                },
            ],
            vout: vec![RawOutput {
                value: 0.5,
                n: 0,
                script_pub_key: ScriptPubKey {
                    hex: "76a9".into(),
                    address: output_address.map(str::to_string),
                },
            }],
        }
    }

    fn stored_block_record(store: &MemoryStore, txid: &str) -> BlockRecord {
        match get_transaction(store, txid).unwrap().unwrap() {
            TransactionRecord::Block(record) => record,
            other => panic!("expected block record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mempool_snapshot_chunked_and_written() {
        let f = fixture();
        f.processor.process_mempool(mempool_snapshot(250)).await;

        assert_eq!(f.store.len(Bucket::Transactions), 250);
        let mut sizes = f.store.batch_sizes.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![100, 150]);
    }

    #[tokio::test]
    async fn test_mempool_dedup_skips_existing() {
        let f = fixture();
        let snapshot = mempool_snapshot(10);

        f.processor.process_mempool(snapshot.clone()).await;
        assert_eq!(f.store.len(Bucket::Transactions), 10);

        // Replaying the identical snapshot writes nothing new
        f.processor.process_mempool(snapshot).await;
        assert_eq!(f.store.len(Bucket::Transactions), 10);
        let sizes = f.store.batch_sizes.lock().unwrap().clone();
        assert_eq!(sizes, vec![10, 0]);
    }

    #[tokio::test]
    async fn test_block_first_sighting_builds_record() {
        let f = fixture();
        f.processor
            .process_block(block_with_tx(100, spend_tx("aa11", Some("receiver"))))
            .await;

        let record = stored_block_record(&f.store, "aa11");
        assert_eq!(record.confirmations, 1);
        assert_eq!(record.block_height, 100);
        assert_eq!(record.block_hash, "hash-100");
        // The scriptless input was dropped; the P2PKH one resolved
        assert_eq!(record.inputs.len(), 1);
        assert_eq!(
            record.inputs[0].resolved_address.as_deref(),
            Some(PUBKEY_ADDRESS)
        );
        assert_eq!(record.outputs[0].resolved_address.as_deref(), Some("receiver"));
    }

    #[tokio::test]
    async fn test_block_resighting_updates_confirmations() {
        let f = fixture();
        f.processor
            .process_block(block_with_tx(100, spend_tx("aa11", None)))
            .await;
        f.processor
            .process_block(block_with_tx(105, spend_tx("aa11", None)))
            .await;

        let record = stored_block_record(&f.store, "aa11");
        assert_eq!(record.confirmations, 6);
        // The original sighting metadata is preserved
        assert_eq!(record.block_height, 100);
    }

    #[tokio::test]
    async fn test_block_replay_does_not_double_increment() {
        let f = fixture();
        let later = block_with_tx(105, spend_tx("aa11", None));

        f.processor
            .process_block(block_with_tx(100, spend_tx("aa11", None)))
            .await;
        f.processor.process_block(later.clone()).await;
        f.processor.process_block(later).await;

        let record = stored_block_record(&f.store, "aa11");
        assert_eq!(record.confirmations, 6);
    }

    #[tokio::test]
    async fn test_block_sighting_replaces_mempool_record() {
        let f = fixture();
        f.processor
            .process_mempool(HashMap::from([("aa11".to_string(), mempool_entry(99))]))
            .await;

        f.processor
            .process_block(block_with_tx(100, spend_tx("aa11", None)))
            .await;

        let record = stored_block_record(&f.store, "aa11");
        assert_eq!(record.confirmations, 1);
        assert_eq!(f.store.len(Bucket::Transactions), 1);
    }

    #[tokio::test]
    async fn test_monitored_input_notified_once_across_resightings() {
        let (url, hits) = testserver::spawn(vec![200]).await;
        let f = fixture();
        put_monitored_address(
            f.store.as_ref(),
            &MonitoredAddress {
                address: PUBKEY_ADDRESS.into(),
                transaction_type: TransactionType::Transfer,
                webhook_url: url,
                maximum_confirmations: 0,
            },
        )
        .unwrap();

        f.processor
            .process_block(block_with_tx(100, spend_tx("aa11", None)))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Re-sighting in a later block must not notify again
        f.processor
            .process_block(block_with_tx(101, spend_tx("aa11", None)))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gap_fill_enqueues_range_in_order() {
        let f = fixture();
        *f.rpc.tip.lock().unwrap() = 9;
        for height in 6..=9 {
            f.rpc.add_block(FakeRpc::simple_block(height));
        }

        f.processor.process_block_range(6, 9).await.unwrap();

        let heights: Vec<u64> = f
            .sink
            .take()
            .into_iter()
            .map(|job| match job {
                JobPayload::Block { block } => block.height,
                other => panic!("unexpected job {other:?}"),
            })
            .collect();
        assert_eq!(heights, vec![6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_gap_fill_errors_on_unavailable_height() {
        let f = fixture();
        *f.rpc.tip.lock().unwrap() = 7;
        for height in 6..=7 {
            f.rpc.add_block(FakeRpc::simple_block(height));
        }

        // The walk fails so the queue retries the range, rather than
        // acking a half-recovered gap.
        let result = f.processor.process_block_range(6, 9).await;
        assert!(result.is_err());
        assert_eq!(f.sink.take().len(), 2);
    }
}
