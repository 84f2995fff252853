//! Key composition for the persistent store
//!
//! All record keys are composed as `bucket ":" key`, matching the
//! bucket-prefixed keyspace the store contract requires. The sync-state
//! slot lives outside any bucket under a fixed key.

/// Logical key namespaces within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Transactions,
    MonitoredAddress,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Transactions => "transactions",
            Bucket::MonitoredAddress => "monitored_address",
        }
    }
}

/// Key of the scalar "last processed height" slot.
pub const SYNC_STATE_KEY: &[u8] = b"lastProcessedBlock";

/// Compose a full store key: `bucket ":" key`.
pub fn compose_key(bucket: Bucket, key: &str) -> Vec<u8> {
    let bucket = bucket.as_str();
    let mut full = Vec::with_capacity(bucket.len() + 1 + key.len());
    full.extend_from_slice(bucket.as_bytes());
    full.push(b':');
    full.extend_from_slice(key.as_bytes());
    full
}
