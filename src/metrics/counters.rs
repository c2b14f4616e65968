//! Atomic counters for connection lifecycle metrics
//!
//! Lock-free counters that can be safely updated from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    // Connect attempts
    pub connect_attempts: AtomicU64,
    pub connects_succeeded: AtomicU64,
    pub connects_failed: AtomicU64,
    pub timeouts_total: AtomicU64,
    pub duplicates_dropped: AtomicU64,

    // Registry
    pub connections_active: AtomicU64,

    // Reconnection
    pub disconnects_total: AtomicU64,
    pub reconnects_succeeded: AtomicU64,
    pub reconnects_failed: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            connect_attempts: AtomicU64::new(0),
            connects_succeeded: AtomicU64::new(0),
            connects_failed: AtomicU64::new(0),
            timeouts_total: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            disconnects_total: AtomicU64::new(0),
            reconnects_succeeded: AtomicU64::new(0),
            reconnects_failed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn connect_attempted(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connect_succeeded(&self) {
        self.connects_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connect_failed(&self) {
        self.connects_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn timeout(&self) {
        self.timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn duplicate_dropped(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // Registry tracking
    #[inline]
    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        // Saturate: shutdown and reconnect may race on the same record count
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    // Reconnect tracking
    #[inline]
    pub fn disconnect_signalled(&self) {
        self.disconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn reconnect_succeeded(&self) {
        self.reconnects_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn reconnect_failed(&self) {
        self.reconnects_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connects_succeeded: self.connects_succeeded.load(Ordering::Relaxed),
            connects_failed: self.connects_failed.load(Ordering::Relaxed),
            timeouts_total: self.timeouts_total.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            disconnects_total: self.disconnects_total.load(Ordering::Relaxed),
            reconnects_succeeded: self.reconnects_succeeded.load(Ordering::Relaxed),
            reconnects_failed: self.reconnects_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub connect_attempts: u64,
    pub connects_succeeded: u64,
    pub connects_failed: u64,
    pub timeouts_total: u64,
    pub duplicates_dropped: u64,
    pub connections_active: u64,
    pub disconnects_total: u64,
    pub reconnects_succeeded: u64,
    pub reconnects_failed: u64,
}
