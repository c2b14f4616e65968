//! Reconnect retry policy

use std::time::Duration;

/// How a dropped endpoint is re-established.
///
/// The first attempt runs immediately; each retry waits
/// `initial_delay * multiplier^retry`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Retries after the first attempt. `None` for unlimited.
    pub max_retries: Option<u32>,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// A single attempt, never retried
    pub fn single_attempt() -> Self {
        Self {
            max_retries: Some(0),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Check if another retry should follow `retry` completed retries
    pub fn should_retry(&self, retry: u32) -> bool {
        match self.max_retries {
            Some(max) => retry < max,
            None => true,
        }
    }

    /// Delay before retry number `retry` (0-indexed)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * factor;
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
