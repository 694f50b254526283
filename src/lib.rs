//! Paced rotary-encoder telemetry publisher.
//!
//! A [`pacer::Pacer`] generates one 360-sample revolution per period and
//! offers it to a bounded [`relay`] queue without blocking. A
//! [`sender::Sender`] drains the queue and delivers each batch through a
//! [`retry::Retrier`] over a [`transport::Transport`]. A single
//! [`shutdown::CancellationToken`] stops both loops.

pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pacer;
pub mod pipeline;
pub mod relay;
pub mod retry;
pub mod sender;
pub mod shutdown;
pub mod transport;
pub mod types;

pub use error::{PublishError, RelayError, RelayResult};
pub use pipeline::Pipeline;
pub use shutdown::{CancellationToken, ShutdownCoordinator};
