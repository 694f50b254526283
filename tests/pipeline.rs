use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use encoder_relay::config::Settings;
use encoder_relay::metrics::MetricsSnapshot;
use encoder_relay::retry::BackoffKind;
use encoder_relay::transport::Transport;
use encoder_relay::{CancellationToken, Pipeline, PublishError, ShutdownCoordinator};

/// Succeeds after a fixed latency and keeps every payload it accepted.
struct LatencyStub {
    latency: Duration,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl LatencyStub {
    fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            payloads: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for LatencyStub {
    async fn publish(&self, _topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        tokio::time::sleep(self.latency).await;
        self.payloads.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}

/// Fails every odd-numbered call.
struct AlternatingStub {
    calls: AtomicU32,
}

#[async_trait]
impl Transport for AlternatingStub {
    async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            Err(PublishError::Disconnected)
        } else {
            Ok(())
        }
    }
}

fn settings(rps: f64, capacity: usize, retries: u32) -> Settings {
    let mut settings = Settings::default();
    settings.encoder.revolutions_per_second = rps;
    settings.encoder.magnitude_seed = Some(99);
    settings.relay.capacity = capacity;
    settings.delivery.retry_attempts = retries;
    settings.delivery.backoff = BackoffKind::Immediate;
    settings
}

async fn run_for(
    settings: &Settings,
    transport: Arc<dyn Transport>,
    duration: Duration,
) -> MetricsSnapshot {
    let pipeline = Pipeline::new(settings, transport).unwrap();
    let token = CancellationToken::new();
    let coordinator = ShutdownCoordinator::new(token.clone());

    let handle = tokio::spawn(pipeline.run(token));
    tokio::time::sleep(duration).await;
    coordinator.trigger("test deadline");
    handle.await.unwrap()
}

fn assert_accounted(snap: &MetricsSnapshot) {
    assert_eq!(snap.generated, snap.enqueued + snap.dropped, "{snap:?}");
    assert_eq!(
        snap.enqueued,
        snap.delivered + snap.abandoned + snap.discarded,
        "{snap:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn two_rps_single_slot_queue_accounts_for_every_batch() {
    let transport = LatencyStub::new(Duration::from_millis(50));
    let snap = run_for(&settings(2.0, 1, 0), transport.clone(), Duration::from_millis(1900)).await;

    // revolutions start at 0, 500, 1000 and 1500ms
    assert_eq!(snap.generated, 4);
    assert_accounted(&snap);
    assert_eq!(snap.delivered, 4);
    assert_eq!(snap.publish_attempts, 4);

    let payloads = transport.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 4);
    for payload in payloads.iter() {
        let samples: Vec<serde_json::Value> = serde_json::from_slice(payload).unwrap();
        assert_eq!(samples.len(), 360);
        assert_eq!(samples[0]["angle"], 0);
        assert_eq!(samples[359]["angle"], 359);
        assert!(samples[0]["voltage"].is_f64());
        assert!(samples[0]["timestamp"].is_i64());
    }
}

#[tokio::test(start_paused = true)]
async fn slow_broker_sheds_newest_batches() {
    let transport = LatencyStub::new(Duration::from_millis(1200));
    let mut settings = settings(2.0, 1, 0);
    settings.delivery.max_in_flight = 1;
    settings.delivery.drain_timeout_ms = 500;

    // 0ms: batch 0 in flight until 1200ms
    // 500ms: batch 1 taken by the sender, waiting for the slot
    // 1000ms: batch 2 fills the queue
    // 1200ms: batch 1 in flight until 2400ms, batch 2 moves to the sender
    // 1500ms: batch 3 fills the queue
    // 2000ms: batch 4 dropped
    let snap = run_for(&settings, transport, Duration::from_millis(2250)).await;

    assert_eq!(snap.generated, 5);
    assert_eq!(snap.dropped, 1);
    // batch 1 completes inside the drain window; 2 and 3 are lost to shutdown
    assert_eq!(snap.delivered, 2);
    assert_eq!(snap.discarded, 2);
    assert_accounted(&snap);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_to_delivery() {
    let transport = Arc::new(AlternatingStub {
        calls: AtomicU32::new(0),
    });
    let mut settings = settings(4.0, 4, 1);
    settings.delivery.max_in_flight = 1;

    let snap = run_for(&settings, transport, Duration::from_millis(1100)).await;

    assert_eq!(snap.generated, 5);
    assert_eq!(snap.delivered, 5);
    assert_eq!(snap.abandoned, 0);
    assert_eq!(snap.publish_failures, 5);
    assert_eq!(snap.publish_attempts, 10);
    assert_accounted(&snap);
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_abandons_without_stopping_the_relay() {
    struct AlwaysDown;

    #[async_trait]
    impl Transport for AlwaysDown {
        async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
            Err(PublishError::Disconnected)
        }
    }

    let snap = run_for(&settings(2.0, 2, 2), Arc::new(AlwaysDown), Duration::from_millis(1900)).await;

    assert_eq!(snap.generated, 4);
    assert_eq!(snap.abandoned, 4);
    assert_eq!(snap.delivered, 0);
    assert_eq!(snap.publish_attempts, 12);
    assert_accounted(&snap);
}

#[tokio::test(start_paused = true)]
async fn nothing_is_generated_after_shutdown() {
    let transport = LatencyStub::new(Duration::from_millis(10));
    let settings = settings(10.0, 4, 0);
    let pipeline = Pipeline::new(&settings, transport).unwrap();
    let metrics = pipeline.metrics();
    let token = CancellationToken::new();

    let handle = tokio::spawn(pipeline.run(token.clone()));
    tokio::time::sleep(Duration::from_millis(350)).await;
    token.cancel();
    let at_stop = handle.await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(metrics.snapshot().generated, at_stop.generated);
    assert_eq!(at_stop.generated, 4);
}

#[tokio::test(start_paused = true)]
async fn seeded_runs_publish_identical_magnitudes() {
    async fn voltages() -> Vec<f64> {
        let transport = LatencyStub::new(Duration::from_millis(1));
        run_for(&settings(1.0, 2, 0), transport.clone(), Duration::from_millis(500)).await;
        let payloads = transport.payloads.lock().unwrap();
        let samples: Vec<serde_json::Value> = serde_json::from_slice(&payloads[0]).unwrap();
        samples.iter().map(|s| s["voltage"].as_f64().unwrap()).collect()
    }

    assert_eq!(voltages().await, voltages().await);
}

#[test]
fn pipeline_rejects_invalid_settings() {
    let transport = LatencyStub::new(Duration::ZERO);
    assert!(Pipeline::new(&settings(0.0, 1, 0), transport.clone()).is_err());
    assert!(Pipeline::new(&settings(1.0, 0, 0), transport).is_err());
}
