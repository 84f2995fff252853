//! Job dispatch
//!
//! Jobs are tagged payloads handed from the poller to the transaction
//! processor. The in-process queue delivers each job to the registered
//! handler at least once, retrying handler failures a bounded number of
//! times with exponential backoff before dropping the job.

use crate::types::{MempoolEntry, VerboseBlock};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// A queued unit of ingestion work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobPayload {
    /// Full mempool snapshot to normalize and dedup.
    Mempool {
        entries: HashMap<String, MempoolEntry>,
    },
    /// Single mined block to ingest.
    Block { block: VerboseBlock },
    /// Inclusive height range of blocks missed while the poller was down.
    BlockRange { from: u64, to: u64 },
}

impl JobPayload {
    /// Type tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Mempool { .. } => "mempool",
            JobPayload::Block { .. } => "block",
            JobPayload::BlockRange { .. } => "block-range",
        }
    }
}

/// Producer side of the queue.
pub trait JobSink: Send + Sync {
    fn enqueue(&self, job: JobPayload) -> Result<()>;
}

/// Consumer side: one handler per process, dispatching on the job tag.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: JobPayload) -> Result<()>;
}

/// Queue-level retry: attempts and exponential backoff base.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based): `base * 2^(retry - 1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// In-process job queue backed by an unbounded channel.
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<JobPayload>,
}

/// Receiver half handed to `spawn_dispatcher`.
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<JobPayload>,
}

impl InProcessQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, JobReceiver { rx })
    }
}

impl JobSink for InProcessQueue {
    fn enqueue(&self, job: JobPayload) -> Result<()> {
        self.tx
            .send(job)
            .ok()
            .context("Job queue is closed")
    }
}

/// Spawn the dispatcher task: one worker task per job, jobs processed
/// concurrently, each retried per `policy` before being dropped.
pub fn spawn_dispatcher<H>(mut receiver: JobReceiver, handler: Arc<H>, policy: RetryPolicy)
where
    H: JobHandler + 'static,
{
    tokio::spawn(async move {
        while let Some(job) = receiver.rx.recv().await {
            let handler = handler.clone();
            let policy = policy.clone();
            tokio::spawn(async move {
                run_with_retry(handler.as_ref(), job, &policy).await;
            });
        }
        debug!("job queue closed, dispatcher exiting");
    });
}

async fn run_with_retry<H: JobHandler + ?Sized>(
    handler: &H,
    job: JobPayload,
    policy: &RetryPolicy,
) {
    let kind = job.kind();
    for attempt in 1..=policy.max_attempts {
        match handler.handle(job.clone()).await {
            Ok(()) => {
                debug!(kind, attempt, "job processed");
                return;
            }
            Err(err) if attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    kind,
                    attempt,
                    error = %err,
                    "job failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                error!(kind, attempt, error = %err, "job failed, dropping after final attempt");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: JobPayload) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                anyhow::bail!("transient failure {call}");
            }
            Ok(())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_job_succeeds_without_retry() {
        let handler = FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: 0,
        };
        run_with_retry(
            &handler,
            JobPayload::BlockRange { from: 1, to: 2 },
            &fast_policy(),
        )
        .await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_retried_until_success() {
        let handler = FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: 2,
        };
        run_with_retry(
            &handler,
            JobPayload::BlockRange { from: 1, to: 2 },
            &fast_policy(),
        )
        .await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_job_dropped_after_max_attempts() {
        let handler = FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: 10,
        };
        run_with_retry(
            &handler,
            JobPayload::BlockRange { from: 1, to: 2 },
            &fast_policy(),
        )
        .await;
        // 3 attempts total, then the job is dropped
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_enqueued_jobs() {
        let handler = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let (queue, receiver) = InProcessQueue::new();
        spawn_dispatcher(receiver, handler.clone(), fast_policy());

        queue
            .enqueue(JobPayload::BlockRange { from: 1, to: 1 })
            .unwrap();
        queue
            .enqueue(JobPayload::BlockRange { from: 2, to: 2 })
            .unwrap();

        // Wait for the spawned workers to drain the queue
        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }
}
