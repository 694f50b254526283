use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters for one publisher run. Cloning shares the counters.
#[derive(Debug, Clone, Default)]
pub struct RelayMetrics {
    generated: Arc<AtomicU64>,
    enqueued: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    publish_attempts: Arc<AtomicU64>,
    publish_failures: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
    abandoned: Arc<AtomicU64>,
    discarded: Arc<AtomicU64>,
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub generated: u64,
    pub enqueued: u64,
    /// Shed because the relay queue was full.
    pub dropped: u64,
    pub publish_attempts: u64,
    pub publish_failures: u64,
    pub delivered: u64,
    /// Retry budget exhausted.
    pub abandoned: u64,
    /// Lost to shutdown: still queued or still retrying when the sender stopped.
    pub discarded: u64,
}

impl MetricsSnapshot {
    /// Batches that were accepted by the queue but have not reached a
    /// terminal state yet.
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.delivered + self.abandoned + self.discarded)
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_generated(&self) {
        self.generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.publish_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: u64) {
        self.discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            generated: self.generated.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            publish_attempts: self.publish_attempts.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn print_summary(&self) {
        let s = self.snapshot();
        println!("\n📊 ENCODER RELAY SUMMARY:");
        println!("   Batches generated: {}", s.generated);
        println!("   Batches enqueued: {}", s.enqueued);
        println!("   Dropped (queue full): {}", s.dropped);
        println!("   Publish attempts: {}", s.publish_attempts);
        println!("   Publish failures: {}", s.publish_failures);
        println!("   Delivered: {}", s.delivered);
        println!("   Abandoned (retries exhausted): {}", s.abandoned);
        println!("   Discarded on shutdown: {}", s.discarded);
    }
}
