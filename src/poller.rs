//! Chain poller
//!
//! Persistent background task that walks the chain one block at a time
//! and snapshots the mempool each iteration, handing everything off to
//! the job queue. The persisted sync state is always written before the
//! in-memory height advances, keeping it a safe lower bound on progress.
//! The poller exclusively owns that state; nothing else writes it.

use crate::config::PollerSettings;
use crate::queue::{JobPayload, JobSink};
use crate::rpc::ChainRpc;
use crate::store::Store;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ChainPoller {
    rpc: Arc<dyn ChainRpc>,
    store: Arc<dyn Store>,
    queue: Arc<dyn JobSink>,
    settings: PollerSettings,
    current_height: u64,
}

impl ChainPoller {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        store: Arc<dyn Store>,
        queue: Arc<dyn JobSink>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            rpc,
            store,
            queue,
            settings,
            current_height: 0,
        }
    }

    /// Height the steady-state loop will try next.
    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    /// Resume from the persisted sync state.
    ///
    /// First run: start at the live tip and persist it immediately, so a
    /// crash before the first block completes does not replay the whole
    /// chain. Resuming behind the tip: enqueue one gap-fill job covering
    /// the missed range and continue past it; the steady-state loop never
    /// revisits those heights.
    pub async fn initialize(&mut self) -> Result<()> {
        let tip = self
            .rpc
            .get_block_count()
            .await
            .context("Failed to get chain tip")?;

        match self.store.get_last_processed_block()? {
            None => {
                info!(tip, "no sync state, starting at the current tip");
                self.store.set_last_processed_block(tip)?;
                self.current_height = tip;
            }
            Some(last) if tip > last => {
                info!(last, tip, "behind the tip, queueing gap recovery");
                self.queue.enqueue(JobPayload::BlockRange {
                    from: last + 1,
                    to: tip,
                })?;
                self.store.set_last_processed_block(tip)?;
                self.current_height = tip + 1;
            }
            Some(last) => {
                info!(last, "resuming from sync state");
                self.current_height = last + 1;
            }
        }

        Ok(())
    }

    /// Run the polling loop. Never returns on its own; individual
    /// failures log and back off, they do not terminate the loop.
    pub async fn run(&mut self) -> Result<()> {
        info!(height = self.current_height, "starting chain poller");

        loop {
            if let Err(err) = self.poll_once().await {
                warn!(error = %err, "poll iteration failed, cooling down");
                tokio::time::sleep(self.settings.error_cooldown).await;
                continue;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// One iteration: snapshot the mempool, then try to advance by one
    /// block. A height beyond the tip is a wait signal, not an error.
    pub async fn poll_once(&mut self) -> Result<()> {
        let entries = self
            .rpc
            .get_raw_mempool()
            .await
            .context("Failed to fetch mempool")?;
        debug!(count = entries.len(), "queueing mempool snapshot");
        self.queue.enqueue(JobPayload::Mempool { entries })?;

        match self
            .rpc
            .get_block_hash(self.current_height)
            .await
            .context("Failed to fetch block hash")?
        {
            None => {
                info!(height = self.current_height, "block not yet mined, waiting");
            }
            Some(hash) => {
                let block = self
                    .rpc
                    .get_block(&hash)
                    .await
                    .with_context(|| format!("Failed to fetch block {hash}"))?;
                info!(height = self.current_height, hash = %hash, "queueing block");
                self.queue.enqueue(JobPayload::Block { block })?;

                // Persist before advancing in memory: the sync state must
                // stay a lower bound on what has been enqueued.
                self.store.set_last_processed_block(self.current_height)?;
                self.current_height += 1;
            }
        }

        Ok(())
    }
}
