//! Layered configuration: defaults, optional TOML file, then
//! `ENCODER_RELAY_*` environment variables. CLI overrides are applied on
//! top by [`crate::cli`].

use config::{Config as RawConfig, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encoder::RevolutionTiming;
use crate::error::{RelayError, RelayResult};
use crate::retry::{BackoffKind, BackoffPolicy, RetryPolicy};

pub const ENV_PREFIX: &str = "ENCODER_RELAY";
pub const DEFAULT_CONFIG_PATH: &str = "config/encoder-relay.toml";

// Defaults
pub const DEFAULT_REVOLUTIONS_PER_SECOND: f64 = 1.0;
pub const DEFAULT_RELAY_CAPACITY: usize = 10;
pub const DEFAULT_TOPIC: &str = "encoder/data";
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 100;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 2_000;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub encoder: EncoderSettings,
    pub relay: RelaySettings,
    pub delivery: DeliverySettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub revolutions_per_second: f64,
    /// Seed for the magnitude source; entropy when unset.
    pub magnitude_seed: Option<u64>,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            revolutions_per_second: DEFAULT_REVOLUTIONS_PER_SECOND,
            magnitude_seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RELAY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub topic: String,
    /// Retries after the first failed attempt.
    pub retry_attempts: u32,
    pub publish_timeout_ms: u64,
    pub backoff: BackoffKind,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Deliveries allowed to run concurrently.
    pub max_in_flight: usize,
    /// How long the sender waits for outstanding deliveries on shutdown.
    pub drain_timeout_ms: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
            backoff: BackoffKind::Exponential,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

impl DeliverySettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.backoff_base_ms);
        let backoff = match self.backoff {
            BackoffKind::Immediate => BackoffPolicy::Immediate,
            BackoffKind::Fixed => BackoffPolicy::Fixed(base),
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                base,
                max: Duration::from_millis(self.backoff_max_ms),
            },
        };
        RetryPolicy {
            budget: self.retry_attempts,
            attempt_timeout: Duration::from_millis(self.publish_timeout_ms),
            backoff,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub qos: u8,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "encoder_simulator".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 5,
            connect_timeout_ms: 5_000,
            reconnect_delay_ms: 1_000,
            qos: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// pretty, compact or json
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Stop on our own after this many seconds.
    pub run_for_secs: Option<u64>,
}

impl RuntimeSettings {
    pub fn run_for(&self) -> Option<Duration> {
        self.run_for_secs.map(Duration::from_secs)
    }
}

impl Settings {
    /// Load from the resolved file (see [`resolve_config_path`]) and the
    /// environment. Call [`validate`](Self::validate) once all overrides
    /// are applied.
    pub fn load(path: Option<&Path>) -> RelayResult<Self> {
        build_raw(path)?.try_deserialize().map_err(|e| {
            RelayError::configuration(format!("Failed to deserialize configuration: {e}"))
        })
    }

    pub fn timing(&self) -> RelayResult<RevolutionTiming> {
        RevolutionTiming::from_rps(self.encoder.revolutions_per_second)
    }

    pub fn validate(&self) -> RelayResult<()> {
        self.timing()?;

        if self.relay.capacity == 0 {
            return Err(RelayError::invalid_value("relay.capacity", 0));
        }
        if self.delivery.topic.trim().is_empty() {
            return Err(RelayError::configuration("delivery.topic must not be empty"));
        }
        if self.delivery.max_in_flight == 0 {
            return Err(RelayError::invalid_value("delivery.max_in_flight", 0));
        }
        if self.delivery.publish_timeout_ms == 0 {
            return Err(RelayError::invalid_value("delivery.publish_timeout_ms", 0));
        }
        if self.broker.client_id.trim().is_empty() {
            return Err(RelayError::configuration("broker.client_id must not be empty"));
        }
        if self.broker.qos > 2 {
            return Err(RelayError::invalid_value("broker.qos", self.broker.qos));
        }
        Ok(())
    }
}

/// The explicit path if given, else [`DEFAULT_CONFIG_PATH`] when it exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
            default_path.exists().then_some(default_path)
        }
    }
}

fn build_raw(path: Option<&Path>) -> RelayResult<RawConfig> {
    let mut builder = RawConfig::builder();

    if let Some(path) = resolve_config_path(path) {
        builder = builder.add_source(
            File::new(&path.to_string_lossy(), FileFormat::Toml).required(true),
        );
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .map_err(|e| RelayError::configuration(format!("Failed to build configuration sources: {e}")))
}
