//! Poller timing settings
//!
//! The steady-state delay bounds RPC pressure; the error cooldown keeps
//! a flapping node from being hammered in a tight loop.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Delay at the end of each successful loop iteration.
    pub poll_interval: Duration,
    /// Delay after a failed iteration before the next attempt.
    pub error_cooldown: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            error_cooldown: Duration::from_secs(30),
        }
    }
}

impl PollerSettings {
    pub fn from_secs(poll_interval: u64, error_cooldown: u64) -> Self {
        Self {
            poll_interval: Duration::from_secs(poll_interval),
            error_cooldown: Duration::from_secs(error_cooldown),
        }
    }
}
