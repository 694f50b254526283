use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::encoder::unix_nanos;
use crate::error::PublishError;
use crate::metrics::RelayMetrics;
use crate::transport::Transport;
use crate::types::EncodedBatch;

/// Wait inserted between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Retry straight away.
    Immediate,
    Fixed(Duration),
    /// `base * 2^(n-1)` before retry `n`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            BackoffPolicy::Immediate => Duration::ZERO,
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::Exponential { base, max } => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Immediate,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one fails.
    pub budget: u32,
    pub attempt_timeout: Duration,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Abandoned { attempts: u32, last_error: PublishError },
}

/// Bounded retry loop around a single publish attempt.
#[derive(Clone)]
pub struct Retrier {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    metrics: RelayMetrics,
}

impl Retrier {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, metrics: RelayMetrics) -> Self {
        Self {
            transport,
            policy,
            metrics,
        }
    }

    /// Deliver `batch` to `topic`, making at most `budget + 1` attempts.
    ///
    /// Exhausting the budget is logged and reported as
    /// [`DeliveryOutcome::Abandoned`]; it is never propagated as an error.
    pub async fn publish_with_retry(&self, topic: &str, batch: &EncodedBatch) -> DeliveryOutcome {
        let max_attempts = self.policy.budget.saturating_add(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.metrics.record_attempt();

            let err = match self.attempt(topic, &batch.payload).await {
                Ok(()) => {
                    self.metrics.record_delivered();
                    info!(
                        "✅ Batch {} published to {topic} (attempt {attempts}/{max_attempts}, {}ms after generation)",
                        batch.sequence,
                        delivery_age_ms(batch, unix_nanos())
                    );
                    return DeliveryOutcome::Delivered { attempts };
                }
                Err(e) => e,
            };
            self.metrics.record_failure();

            if attempts >= max_attempts {
                self.metrics.record_abandoned();
                error!(
                    "❌ Batch {} dropped after {attempts} attempts: {err}",
                    batch.sequence
                );
                return DeliveryOutcome::Abandoned {
                    attempts,
                    last_error: err,
                };
            }

            let delay = self.policy.backoff.delay(attempts);
            warn!(
                "⚠️ Publishing batch {} failed: {err}. Retrying in {delay:?} ({} attempts left)",
                batch.sequence,
                max_attempts - attempts
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }

    async fn attempt(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let limit = self.policy.attempt_timeout;
        match timeout(limit, self.transport.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::timeout(limit)),
        }
    }
}

/// Milliseconds between the batch's first sample and `now_ns`, floored at 0.
fn delivery_age_ms(batch: &EncodedBatch, now_ns: i64) -> i64 {
    now_ns.saturating_sub(batch.started_at_ns).max(0) / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` attempts, then succeeds.
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PublishError::Disconnected)
            } else {
                Ok(())
            }
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
            std::future::pending().await
        }
    }

    fn policy(budget: u32) -> RetryPolicy {
        RetryPolicy {
            budget,
            attempt_timeout: Duration::from_secs(1),
            backoff: BackoffPolicy::Immediate,
        }
    }

    fn batch() -> EncodedBatch {
        EncodedBatch {
            sequence: 9,
            started_at_ns: 0,
            payload: b"[]".to_vec(),
        }
    }

    #[tokio::test]
    async fn delivers_once_when_failures_fit_budget() {
        for (failures, budget) in [(0, 0), (1, 1), (2, 3), (3, 3)] {
            let transport = FlakyTransport::new(failures);
            let metrics = RelayMetrics::new();
            let retrier = Retrier::new(transport.clone(), policy(budget), metrics.clone());

            let outcome = retrier.publish_with_retry("encoder/data", &batch()).await;
            assert_eq!(
                outcome,
                DeliveryOutcome::Delivered {
                    attempts: failures + 1
                }
            );
            assert_eq!(transport.calls.load(Ordering::SeqCst), failures + 1);

            let snap = metrics.snapshot();
            assert_eq!(snap.delivered, 1);
            assert_eq!(snap.abandoned, 0);
            assert_eq!(snap.publish_failures, failures as u64);
        }
    }

    #[tokio::test]
    async fn abandons_after_budget_plus_one_attempts() {
        for (failures, budget) in [(1, 0), (3, 2), (10, 3)] {
            let transport = FlakyTransport::new(failures);
            let metrics = RelayMetrics::new();
            let retrier = Retrier::new(transport.clone(), policy(budget), metrics.clone());

            let outcome = retrier.publish_with_retry("encoder/data", &batch()).await;
            assert_eq!(
                outcome,
                DeliveryOutcome::Abandoned {
                    attempts: budget + 1,
                    last_error: PublishError::Disconnected,
                }
            );
            assert_eq!(transport.calls.load(Ordering::SeqCst), budget + 1);

            let snap = metrics.snapshot();
            assert_eq!(snap.delivered, 0);
            assert_eq!(snap.abandoned, 1);
            assert_eq!(snap.publish_attempts, (budget + 1) as u64);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_counts_as_failure() {
        let retrier = Retrier::new(
            Arc::new(HangingTransport),
            RetryPolicy {
                budget: 1,
                attempt_timeout: Duration::from_millis(200),
                backoff: BackoffPolicy::Immediate,
            },
            RelayMetrics::new(),
        );

        let outcome = retrier.publish_with_retry("t", &batch()).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Abandoned {
                attempts: 2,
                last_error: PublishError::Timeout { after_ms: 200 },
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_backoff_between_attempts() {
        let transport = FlakyTransport::new(2);
        let retrier = Retrier::new(
            transport,
            RetryPolicy {
                budget: 2,
                attempt_timeout: Duration::from_secs(1),
                backoff: BackoffPolicy::Fixed(Duration::from_millis(300)),
            },
            RelayMetrics::new(),
        );

        let started = tokio::time::Instant::now();
        let outcome = retrier.publish_with_retry("t", &batch()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let backoff = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_millis(1000));
        assert_eq!(backoff.delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn delivery_age_counts_from_first_sample() {
        let mut batch = batch();
        batch.started_at_ns = 5_000_000_000;
        assert_eq!(delivery_age_ms(&batch, 5_250_000_000), 250);
        // clock stepped backwards
        assert_eq!(delivery_age_ms(&batch, 4_000_000_000), 0);
    }

    #[test]
    fn immediate_backoff_is_zero() {
        assert_eq!(BackoffPolicy::Immediate.delay(3), Duration::ZERO);
    }
}
