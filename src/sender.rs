use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::metrics::RelayMetrics;
use crate::relay::RelayConsumer;
use crate::retry::{DeliveryOutcome, Retrier};
use crate::shutdown::CancellationToken;

/// Drains the relay queue and hands each batch to its own delivery task.
///
/// At most `max_in_flight` deliveries run at once; while all slots are busy
/// the sender stops dequeuing and the pacer's queue absorbs (or sheds) the
/// backlog.
pub struct Sender {
    consumer: RelayConsumer,
    retrier: Retrier,
    topic: Arc<str>,
    in_flight: Arc<Semaphore>,
    drain_timeout: Duration,
    metrics: RelayMetrics,
    shutdown: CancellationToken,
}

impl Sender {
    pub fn new(
        consumer: RelayConsumer,
        retrier: Retrier,
        topic: impl Into<Arc<str>>,
        max_in_flight: usize,
        drain_timeout: Duration,
        metrics: RelayMetrics,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            consumer,
            retrier,
            topic: topic.into(),
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            drain_timeout,
            metrics,
            shutdown,
        }
    }

    /// Run until the token is cancelled, then discard whatever is still
    /// queued and give outstanding deliveries `drain_timeout` to finish.
    ///
    /// Batches still queued or still retrying at that point are lost; they
    /// are counted as discarded and never requeued.
    pub async fn run(mut self) {
        info!("📤 Sender started, publishing to {}", self.topic);
        let mut deliveries = JoinSet::new();

        loop {
            while let Some(finished) = deliveries.try_join_next() {
                self.reap(finished);
            }

            let Some(batch) = self.consumer.dequeue(&self.shutdown).await else {
                break;
            };

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!("📤 Shutdown while waiting for a delivery slot, batch {} discarded", batch.sequence);
                    self.metrics.record_discarded(1);
                    break;
                }
                permit = self.in_flight.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!("📤 Delivery slots closed, batch {} discarded", batch.sequence);
                        self.metrics.record_discarded(1);
                        break;
                    }
                },
            };

            let retrier = self.retrier.clone();
            let topic = self.topic.clone();
            deliveries.spawn(async move {
                let _permit = permit;
                retrier.publish_with_retry(&topic, &batch).await
            });
        }

        let leftover = self.consumer.drain_remaining();
        if leftover > 0 {
            warn!("📤 Discarding {leftover} queued batches on shutdown");
            self.metrics.record_discarded(leftover as u64);
        }
        self.drain(deliveries).await;
        info!("📤 Sender stopped");
    }

    async fn drain(&self, mut deliveries: JoinSet<DeliveryOutcome>) {
        if deliveries.is_empty() {
            return;
        }
        info!(
            "📤 Waiting up to {:?} for {} in-flight deliveries",
            self.drain_timeout,
            deliveries.len()
        );

        let deadline = Instant::now() + self.drain_timeout;
        loop {
            match timeout_at(deadline, deliveries.join_next()).await {
                Ok(Some(finished)) => self.reap(finished),
                Ok(None) => return,
                Err(_) => break,
            }
        }

        warn!(
            "📤 Drain timeout, aborting {} in-flight deliveries",
            deliveries.len()
        );
        deliveries.abort_all();
        while let Some(finished) = deliveries.join_next().await {
            self.reap(finished);
        }
    }

    fn reap(&self, finished: Result<DeliveryOutcome, JoinError>) {
        match finished {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => self.metrics.record_discarded(1),
            Err(e) => {
                error!("📤 Delivery task failed: {e}");
                self.metrics.record_discarded(1);
            }
        }
    }
}
