//! Store trait and RocksDB implementation
//!
//! Persistent key-value store shared by the poller (sync state) and the
//! processor workers (transaction and monitored-address records). The
//! atomic multi-key batch is the only synchronization primitive the
//! pipeline relies on.

use crate::keys::{compose_key, Bucket, SYNC_STATE_KEY};
use crate::records::{MonitoredAddress, TransactionRecord};
use anyhow::{Context, Result};
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;

/// A single unit of an atomic batch write.
#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub bucket: Bucket,
    pub key: String,
    pub op: BatchOp,
}

#[derive(Debug, Clone)]
pub enum BatchOp {
    Put(Vec<u8>),
    Del,
}

/// Trait defining the interface for the transaction index store.
///
/// Keys are composed as `bucket ":" key`; `batch` applies all of its
/// commands atomically (a crash mid-batch leaves all-or-none visible).
pub trait Store: Send + Sync {
    /// Get a raw value by bucket and key.
    fn get(&self, bucket: Bucket, key: &str) -> Result<Option<Vec<u8>>>;

    /// Check whether a key exists.
    fn exists(&self, bucket: Bucket, key: &str) -> Result<bool>;

    /// Store a raw value.
    fn put(&self, bucket: Bucket, key: &str, value: &[u8]) -> Result<()>;

    /// Delete a value.
    fn del(&self, bucket: Bucket, key: &str) -> Result<()>;

    /// Apply a set of put/del commands atomically.
    fn batch(&self, commands: Vec<BatchCommand>) -> Result<()>;

    /// Persist the height of the highest block handed to the queue.
    fn set_last_processed_block(&self, height: u64) -> Result<()>;

    /// Read the persisted sync state, if any.
    fn get_last_processed_block(&self) -> Result<Option<u64>>;
}

/// Get a transaction record by txid.
pub fn get_transaction(store: &dyn Store, txid: &str) -> Result<Option<TransactionRecord>> {
    match store.get(Bucket::Transactions, txid)? {
        Some(bytes) => {
            let record = postcard::from_bytes(&bytes)
                .context("Failed to deserialize transaction record")?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

/// Store a transaction record under its txid.
pub fn put_transaction(store: &dyn Store, record: &TransactionRecord) -> Result<()> {
    let value =
        postcard::to_allocvec(record).context("Failed to serialize transaction record")?;
    store.put(Bucket::Transactions, record.tx_hash(), &value)
}

/// Build the batch command that inserts a transaction record.
pub fn transaction_put_command(record: &TransactionRecord) -> Result<BatchCommand> {
    let value =
        postcard::to_allocvec(record).context("Failed to serialize transaction record")?;
    Ok(BatchCommand {
        bucket: Bucket::Transactions,
        key: record.tx_hash().to_string(),
        op: BatchOp::Put(value),
    })
}

/// Get a monitored-address record by address.
pub fn get_monitored_address(
    store: &dyn Store,
    address: &str,
) -> Result<Option<MonitoredAddress>> {
    match store.get(Bucket::MonitoredAddress, address)? {
        Some(bytes) => {
            let record = postcard::from_bytes(&bytes)
                .context("Failed to deserialize monitored address")?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

/// Store a monitored-address record under its address.
pub fn put_monitored_address(store: &dyn Store, record: &MonitoredAddress) -> Result<()> {
    let value =
        postcard::to_allocvec(record).context("Failed to serialize monitored address")?;
    store.put(Bucket::MonitoredAddress, &record.address, &value)
}

/// RocksDB-backed implementation of `Store`.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).context("Failed to open RocksDB database")?;
        Ok(Self { db })
    }
}

impl Store for RocksStore {
    fn get(&self, bucket: Bucket, key: &str) -> Result<Option<Vec<u8>>> {
        let key = compose_key(bucket, key);
        self.db.get(&key).context("Failed to get value")
    }

    fn exists(&self, bucket: Bucket, key: &str) -> Result<bool> {
        let key = compose_key(bucket, key);
        Ok(self.db.get(&key).context("Failed to check key")?.is_some())
    }

    fn put(&self, bucket: Bucket, key: &str, value: &[u8]) -> Result<()> {
        let key = compose_key(bucket, key);
        self.db.put(&key, value).context("Failed to put value")
    }

    fn del(&self, bucket: Bucket, key: &str) -> Result<()> {
        let key = compose_key(bucket, key);
        self.db.delete(&key).context("Failed to delete value")
    }

    fn batch(&self, commands: Vec<BatchCommand>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for command in commands {
            let key = compose_key(command.bucket, &command.key);
            match command.op {
                BatchOp::Put(value) => batch.put(&key, &value),
                BatchOp::Del => batch.delete(&key),
            }
        }
        self.db.write(batch).context("Failed to write batch")
    }

    fn set_last_processed_block(&self, height: u64) -> Result<()> {
        self.db
            .put(SYNC_STATE_KEY, height.to_be_bytes())
            .context("Failed to persist sync state")
    }

    fn get_last_processed_block(&self) -> Result<Option<u64>> {
        match self.db.get(SYNC_STATE_KEY).context("Failed to read sync state")? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("Sync state must be 8 bytes, got {}", bytes.len()))?;
                Ok(Some(u64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }
}
