use serde::{Deserialize, Serialize};

use crate::error::RelayResult;

/// Samples per simulated revolution, one per degree.
pub const SAMPLES_PER_REVOLUTION: usize = 360;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub angle: u16,
    #[serde(rename = "voltage")]
    pub magnitude: f64,
    pub timestamp: i64,
}

/// One revolution's worth of samples, in angle order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    pub samples: Vec<Sample>,
}

impl Batch {
    /// Serialize to the wire payload: a JSON array of
    /// `{"angle", "voltage", "timestamp"}` objects.
    pub fn encode(&self, sequence: u64, started_at_ns: i64) -> RelayResult<EncodedBatch> {
        let payload = serde_json::to_vec(self)?;
        Ok(EncodedBatch {
            sequence,
            started_at_ns,
            payload,
        })
    }
}

/// A serialized batch as it travels through the relay queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    /// Generation order, starting at 0. Not part of the payload.
    pub sequence: u64,
    /// Wall-clock time of the first sample, in Unix nanoseconds.
    pub started_at_ns: i64,
    pub payload: Vec<u8>,
}
