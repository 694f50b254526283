use rand::Rng;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::encoder::{generate_batch, unix_nanos, RevolutionTiming};
use crate::metrics::RelayMetrics;
use crate::relay::RelayProducer;
use crate::shutdown::CancellationToken;

/// Wall-clock paced producer: one batch per revolution period.
pub struct Pacer<R> {
    timing: RevolutionTiming,
    producer: RelayProducer,
    rng: R,
    metrics: RelayMetrics,
    shutdown: CancellationToken,
    next_sequence: u64,
}

impl<R: Rng + Send> Pacer<R> {
    pub fn new(
        timing: RevolutionTiming,
        producer: RelayProducer,
        rng: R,
        metrics: RelayMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            timing,
            producer,
            rng,
            metrics,
            shutdown,
            next_sequence: 0,
        }
    }

    /// Run until the token is cancelled. Nothing is generated or enqueued
    /// once cancellation has been observed.
    pub async fn run(mut self) {
        let period = self.timing.period();
        info!(
            "🌀 Pacer started: period {:?}, {}ns between samples",
            period, self.timing.sample_delta_ns
        );

        while !self.shutdown.is_cancelled() {
            let deadline = Instant::now() + period;
            self.produce_one();

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = sleep_until(deadline) => {}
            }
        }

        info!("🌀 Pacer stopped after {} revolutions", self.next_sequence);
    }

    fn produce_one(&mut self) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let started_at_ns = unix_nanos();
        let batch = generate_batch(started_at_ns, self.timing.sample_delta_ns, &mut self.rng);
        self.metrics.record_generated();

        let encoded = match batch.encode(sequence, started_at_ns) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.metrics.record_dropped();
                error!("🌀 Failed to encode batch {sequence}: {e}");
                return;
            }
        };

        if self.producer.try_enqueue(encoded) {
            self.metrics.record_enqueued();
            debug!(
                "🌀 Batch {sequence} queued ({}/{})",
                self.producer.len(),
                self.producer.capacity()
            );
        } else {
            self.metrics.record_dropped();
            warn!(
                "⚠️ Relay queue full ({} capacity), dropping batch {sequence}",
                self.producer.capacity()
            );
        }
    }
}
