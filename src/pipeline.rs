use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info};

use crate::config::Settings;
use crate::encoder::RevolutionTiming;
use crate::error::RelayResult;
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crate::pacer::Pacer;
use crate::relay::relay_queue;
use crate::retry::Retrier;
use crate::sender::Sender;
use crate::shutdown::CancellationToken;
use crate::transport::Transport;

/// Extra allowance on top of one period plus the drain window before
/// stuck loops are aborted.
const STOP_SLACK: Duration = Duration::from_secs(1);

/// Pacer, relay queue and sender wired around one transport.
pub struct Pipeline {
    settings: Settings,
    timing: RevolutionTiming,
    transport: Arc<dyn Transport>,
    metrics: RelayMetrics,
}

impl Pipeline {
    pub fn new(settings: &Settings, transport: Arc<dyn Transport>) -> RelayResult<Self> {
        settings.validate()?;
        Ok(Self {
            timing: settings.timing()?,
            settings: settings.clone(),
            transport,
            metrics: RelayMetrics::new(),
        })
    }

    pub fn metrics(&self) -> RelayMetrics {
        self.metrics.clone()
    }

    /// Run until `shutdown` is cancelled and both loops have stopped.
    pub async fn run(self, shutdown: CancellationToken) -> MetricsSnapshot {
        let (producer, consumer) = relay_queue(self.settings.relay.capacity);

        let rng = match self.settings.encoder.magnitude_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pacer = Pacer::new(
            self.timing,
            producer,
            rng,
            self.metrics.clone(),
            shutdown.clone(),
        );

        let delivery = &self.settings.delivery;
        let retrier = Retrier::new(
            self.transport.clone(),
            delivery.retry_policy(),
            self.metrics.clone(),
        );
        let sender = Sender::new(
            consumer,
            retrier,
            delivery.topic.as_str(),
            delivery.max_in_flight,
            delivery.drain_timeout(),
            self.metrics.clone(),
            shutdown.clone(),
        );

        info!(
            "🚀 Relay running: {} rps, queue capacity {}, {} retries per batch, topic {}",
            self.settings.encoder.revolutions_per_second,
            self.settings.relay.capacity,
            delivery.retry_attempts,
            delivery.topic
        );

        let mut loops = JoinSet::new();
        loops.spawn(async move {
            pacer.run().await;
            "pacer"
        });
        loops.spawn(async move {
            sender.run().await;
            "sender"
        });

        // Neither loop ends on its own; if one does, take the other down too.
        tokio::select! {
            _ = shutdown.cancelled() => {}
            Some(finished) = loops.join_next() => {
                match finished {
                    Ok(name) => error!("{name} stopped before shutdown was requested"),
                    Err(e) => error!("Relay loop failed: {e}"),
                }
                shutdown.cancel();
            }
        }

        let grace = self.timing.period() + delivery.drain_timeout() + STOP_SLACK;
        let mut stopped = 0;
        loop {
            match timeout(grace, loops.join_next()).await {
                Ok(Some(Ok(name))) => {
                    stopped += 1;
                    info!("✅ {name} stopped");
                }
                Ok(Some(Err(e))) => error!("Relay loop failed during shutdown: {e:?}"),
                Ok(None) => break,
                Err(_) => {
                    error!("Shutdown timeout, aborting remaining relay loops");
                    break;
                }
            }
        }
        loops.abort_all();

        info!("✅ {stopped} relay loops stopped");
        self.metrics.snapshot()
    }
}
