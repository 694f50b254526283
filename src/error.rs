use std::time::Duration;
use thiserror::Error;

/// Process-level errors. Anything surfacing here is fatal at startup;
/// the running loops never return one of these.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidConfigValue { key: String, value: String },

    #[error("Broker connection failed: {message}")]
    Connection { message: String },

    #[error("Batch serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Signal handler setup failed: {message}")]
    Signal { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RelayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_value(key: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidConfigValue {
            key: key.into(),
            value: value.to_string(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn signal(message: impl Into<String>) -> Self {
        Self::Signal {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Outcome of a single failed publish attempt. Always transient from the
/// retrier's point of view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("broker is disconnected")]
    Disconnected,

    #[error("publish timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("publish rejected: {message}")]
    Rejected { message: String },
}

impl PublishError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}
