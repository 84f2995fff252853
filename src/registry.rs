//! Monitored-address registration
//!
//! Validated create-or-update of `MonitoredAddress` records. The HTTP
//! transport in front of this lives outside the indexing core; this is
//! the storage-facing half the external endpoint calls into.

use crate::records::{MonitoredAddress, TransactionType};
use crate::store::{put_monitored_address, Store};
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// Registration payload as received from the external endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorAddressRequest {
    pub webhook_url: String,
    pub address: String,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub maximum_confirmations: Option<u64>,
}

/// Validate a registration request and store the record keyed by
/// address. Re-registering an address overwrites its previous settings.
pub fn register_address(
    store: &dyn Store,
    request: MonitorAddressRequest,
) -> Result<MonitoredAddress> {
    let address = request.address.trim();
    if address.is_empty() {
        anyhow::bail!("address must not be empty");
    }

    let url = reqwest::Url::parse(&request.webhook_url)
        .with_context(|| format!("invalid webhook URL: {}", request.webhook_url))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("webhook URL must be http or https, got {}", url.scheme());
    }

    let record = MonitoredAddress {
        address: address.to_string(),
        transaction_type: request.transaction_type,
        webhook_url: request.webhook_url,
        maximum_confirmations: request.maximum_confirmations.unwrap_or(0),
    };
    put_monitored_address(store, &record)?;

    info!(
        address = %record.address,
        transaction_type = ?record.transaction_type,
        "registered monitored address"
    );
    Ok(record)
}
