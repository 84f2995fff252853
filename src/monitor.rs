//! Address monitoring and webhook dispatch
//!
//! Matches the resolved addresses of a block transaction against the
//! monitored-address set and posts notifications to the registered
//! webhooks, retrying transient HTTP failures with exponential backoff.

use crate::records::{BlockRecord, MonitoredAddress, TransactionType};
use crate::store::{get_monitored_address, Store};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Maximum webhook delivery retries before giving up.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Status codes worth retrying; anything else is terminal.
pub const RETRYABLE_STATUS_CODES: [u16; 8] = [408, 429, 500, 502, 503, 504, 522, 524];

/// Which side of a transaction a monitored address appeared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The monitored address is receiving (matched an output).
    Deposit,
    /// The monitored address is spending (matched an input).
    Transfer,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deposit => "DEPOSIT",
            Direction::Transfer => "TRANSFER",
        }
    }
}

/// Decide whether a match should notify.
///
/// The confirmation-threshold clause is an inclusive OR with the
/// direction filter: a sighting at or below `maximum_confirmations`
/// notifies even when the registered direction does not match. This
/// mirrors the original dispatch logic exactly (see DESIGN.md); do not
/// tighten it to an AND.
pub fn should_notify(
    monitored: &MonitoredAddress,
    direction: Direction,
    confirmations: u64,
) -> bool {
    let direction_matches = match monitored.transaction_type {
        TransactionType::All => true,
        TransactionType::Deposit => direction == Direction::Deposit,
        TransactionType::Transfer => direction == Direction::Transfer,
    };
    direction_matches || confirmations <= monitored.maximum_confirmations
}

/// Outcome of a webhook delivery attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Non-retryable status or transport failure.
    Failed,
    /// Retryable failures until the attempt cap.
    Exhausted,
}

/// Posts notifications with bounded exponential-backoff retry.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    max_attempts: u32,
    base_delay: Duration,
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        Self::with_policy(MAX_RETRY_ATTEMPTS, Duration::from_millis(1000))
    }

    pub fn with_policy(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_attempts,
            base_delay,
        }
    }

    /// Backoff before retry number `attempt`: `base * 2^attempt`.
    fn retry_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// POST `{transaction, message}` to `url`.
    ///
    /// Retries only the retryable status codes, waiting
    /// `base * 2^attempt` between tries. Never returns an error: webhook
    /// failure must not fail the enclosing job.
    pub async fn deliver(
        &self,
        url: &str,
        transaction: &BlockRecord,
        message: &str,
    ) -> DeliveryOutcome {
        let body = json!({
            "transaction": transaction,
            "message": message,
        });

        let mut attempt = 0u32;
        loop {
            let response = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    info!(url, attempt, "webhook delivered");
                    return DeliveryOutcome::Delivered;
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if !RETRYABLE_STATUS_CODES.contains(&status) {
                        error!(url, status, "webhook rejected with non-retryable status");
                        return DeliveryOutcome::Failed;
                    }
                    attempt += 1;
                    if attempt > self.max_attempts {
                        error!(url, status, "webhook retries exhausted");
                        return DeliveryOutcome::Exhausted;
                    }
                    let delay = self.retry_delay(attempt);
                    warn!(url, status, attempt, "retrying webhook in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    // The retry predicate is status-code based; a transport
                    // failure has no status and is terminal.
                    error!(url, error = %err, "webhook transport failure");
                    return DeliveryOutcome::Failed;
                }
            }
        }
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves candidate addresses from a block transaction and notifies
/// the webhooks of any monitored matches.
pub struct AddressMonitor {
    store: Arc<dyn Store>,
    webhook: WebhookDispatcher,
}

impl AddressMonitor {
    pub fn new(store: Arc<dyn Store>, webhook: WebhookDispatcher) -> Self {
        Self { store, webhook }
    }

    /// Check every resolved input and output address of `record` against
    /// the monitored set, dispatching one notification per match.
    ///
    /// Returns the number of notifications dispatched; lookup failures
    /// are logged and skipped.
    pub async fn inspect(&self, record: &BlockRecord) -> usize {
        let mut notified = 0;

        for input in &record.inputs {
            if let Some(address) = &input.resolved_address {
                notified += self
                    .check_address(address, Direction::Transfer, record)
                    .await;
            }
        }
        for output in &record.outputs {
            if let Some(address) = &output.resolved_address {
                notified += self
                    .check_address(address, Direction::Deposit, record)
                    .await;
            }
        }

        notified
    }

    async fn check_address(
        &self,
        address: &str,
        direction: Direction,
        record: &BlockRecord,
    ) -> usize {
        let monitored = match get_monitored_address(self.store.as_ref(), address) {
            Ok(Some(monitored)) => monitored,
            Ok(None) => return 0,
            Err(err) => {
                error!(address, error = %err, "monitored-address lookup failed");
                return 0;
            }
        };

        if !should_notify(&monitored, direction, record.confirmations) {
            return 0;
        }

        info!(
            address,
            direction = direction.as_str(),
            tx_hash = %record.tx_hash,
            "transaction matched monitored address"
        );

        let message = format!(
            "{} transaction {} observed for monitored address {}",
            direction.as_str(),
            record.tx_hash,
            address
        );
        self.webhook
            .deliver(&monitored.webhook_url, record, &message)
            .await;
        1
    }
}
