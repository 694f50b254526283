use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingSettings;
use crate::error::{RelayError, RelayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(RelayError::configuration(format!(
                "Invalid log format: {s}. Valid options: pretty, compact, json"
            ))),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `settings.level`.
pub fn init_logging(settings: &LoggingSettings) -> RelayResult<()> {
    let format = settings.format.parse::<LogFormat>()?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level).map_err(|e| {
            RelayError::configuration(format!("Invalid log level '{}': {e}", settings.level))
        })?,
    };

    let registry = Registry::default().with(filter);
    let result = match format {
        LogFormat::Pretty => registry.with(fmt::layer().pretty().with_target(false)).try_init(),
        LogFormat::Compact => registry.with(fmt::layer().compact().with_target(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.map_err(|e| RelayError::internal(format!("Failed to install log subscriber: {e}")))?;

    tracing::info!("⚬ Logging initialized: level {}, format {}", settings.level, settings.format);
    Ok(())
}
