//! Synthetic rotary-encoder revolutions.

use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{RelayError, RelayResult};
use crate::types::{Batch, Sample, SAMPLES_PER_REVOLUTION};

pub const MAGNITUDE_MAX: f64 = 5.0;

const NANOS_PER_SECOND: f64 = 1e9;

/// Longest accepted revolution: one day.
pub const MAX_PERIOD_NS: i64 = 86_400 * 1_000_000_000;

/// Pacing derived from revolutions per second.
///
/// Both values are truncated to whole nanoseconds, so
/// `sample_delta_ns * 360` may fall short of `period_ns` by up to 359ns.
/// The pacer sleeps on `period_ns`; sample timestamps use `sample_delta_ns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevolutionTiming {
    pub period_ns: i64,
    pub sample_delta_ns: i64,
}

impl RevolutionTiming {
    pub fn from_rps(rps: f64) -> RelayResult<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return Err(RelayError::invalid_value(
                "encoder.revolutions_per_second",
                rps,
            ));
        }

        let period = NANOS_PER_SECOND / rps;
        if period > MAX_PERIOD_NS as f64 {
            return Err(RelayError::invalid_value(
                "encoder.revolutions_per_second",
                rps,
            ));
        }

        let period_ns = period as i64;
        let sample_delta_ns = period_ns / SAMPLES_PER_REVOLUTION as i64;
        if sample_delta_ns < 1 {
            return Err(RelayError::configuration(format!(
                "{rps} revolutions per second leaves less than 1ns between samples"
            )));
        }

        Ok(Self {
            period_ns,
            sample_delta_ns,
        })
    }

    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ns as u64)
    }
}

/// Build one revolution starting at `start_time`.
///
/// `sample_delta_ns` must be positive. Timestamps saturate at `i64::MAX`
/// instead of wrapping. Magnitudes are uniform in
/// `[0.0, 5.0)` and drawn from `rng`, so a seeded source gives identical
/// batches for identical inputs.
pub fn generate_batch<R: Rng + ?Sized>(start_time: i64, sample_delta_ns: i64, rng: &mut R) -> Batch {
    debug_assert!(sample_delta_ns > 0, "sample delta must be positive");

    let samples = (0..SAMPLES_PER_REVOLUTION)
        .map(|i| Sample {
            angle: i as u16,
            magnitude: rng.gen_range(0.0..MAGNITUDE_MAX),
            timestamp: start_time.saturating_add((i as i64).saturating_mul(sample_delta_ns)),
        })
        .collect();

    Batch { samples }
}

/// Wall-clock nanoseconds since the Unix epoch.
pub fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}
