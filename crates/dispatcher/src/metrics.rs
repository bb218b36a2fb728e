//! Per-destination delivery metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Lock-free counters for one destination worker
#[derive(Debug, Default)]
pub struct DestinationMetrics {
    /// Deliveries pulled from the subscription
    received: AtomicU64,
    /// Deliveries acked after handler success
    acked: AtomicU64,
    /// Deliveries acked without a handler (drop policy)
    dropped: AtomicU64,
    /// Deliveries nacked, any reason
    nacked: AtomicU64,
    /// Handler retries scheduled
    retries: AtomicU64,
    /// Bodies the codec rejected
    decode_failures: AtomicU64,
    /// Handlers that used up their retry budget
    exhausted: AtomicU64,
    /// Failed ack/nack calls
    settle_failures: AtomicU64,
    /// Deliveries currently being processed
    in_flight: AtomicUsize,
}

impl DestinationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn inc_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nacked(&self) -> u64 {
        self.nacked.load(Ordering::Relaxed)
    }

    pub fn inc_nacked(&self) {
        self.nacked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn inc_decode_failures(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    pub fn inc_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn settle_failures(&self) -> u64 {
        self.settle_failures.load(Ordering::Relaxed)
    }

    pub fn inc_settle_failures(&self) {
        self.settle_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Mark a delivery as started, returning the new in-flight count
    pub fn delivery_started(&self) -> usize {
        self.in_flight.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Mark a delivery as settled, returning the new in-flight count
    pub fn delivery_finished(&self) -> usize {
        self.in_flight
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received(),
            acked: self.acked(),
            dropped: self.dropped(),
            nacked: self.nacked(),
            retries: self.retries(),
            decode_failures: self.decode_failures(),
            exhausted: self.exhausted(),
            settle_failures: self.settle_failures(),
            in_flight: self.in_flight(),
        }
    }
}

/// Snapshot of destination metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub acked: u64,
    pub dropped: u64,
    pub nacked: u64,
    pub retries: u64,
    pub decode_failures: u64,
    pub exhausted: u64,
    pub settle_failures: u64,
    pub in_flight: usize,
}

impl MetricsSnapshot {
    /// Deliveries that reached a final ack or nack
    pub fn settled(&self) -> u64 {
        self.acked + self.dropped + self.nacked
    }
}
