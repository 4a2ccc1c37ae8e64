// ============================
// crates/client-lib/src/backoff.rs
// ============================
//! Reconnection policy.

use std::time::Duration;

/// Fixed-delay retry budget for the reconnection loop.
///
/// Reconnection is about riding out brief network blips, not outlasting a
/// server outage, so the delay stays flat and the budget is small. Once the
/// budget is spent the client parks in `Failed` until told to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Pause between attempts.
    pub delay: Duration,
    /// Attempts before giving up.
    pub max_attempts: u8,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (zero-based), or `None` once
    /// the budget is exhausted.
    pub fn delay_for(&self, attempt: u8) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}
