//! # Bus Metrics
//!
//! Lock-free counters for bus traffic. A subscriber that overflows its
//! bounded buffer is marked degraded; it keeps receiving subsequent
//! envelopes, but the degradation must be observable, which is what these
//! counters are for.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, updated atomically
#[derive(Debug, Default)]
pub struct BusMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    degraded_subscribers: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Called once per subscriber on its first overflow
    pub fn record_degraded_subscriber(&self) {
        self.degraded_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    /// Serializable point-in-time view
    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            degraded_subscribers: self.degraded_subscribers.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`BusMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct BusMetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub degraded_subscribers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = BusMetrics::new();
        metrics.record_published();
        metrics.record_delivered();
        metrics.record_delivered();
        metrics.record_dropped();
        metrics.record_degraded_subscriber();

        let snap = metrics.snapshot();
        assert_eq!(snap.published, 1);
        assert_eq!(snap.delivered, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.degraded_subscribers, 1);
    }
}
