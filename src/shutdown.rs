use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::{RelayError, RelayResult};

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// One-way shutdown signal shared by every loop.
///
/// Once cancelled it stays cancelled. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Returns `true` only for the call that performed
    /// the transition.
    pub fn cancel(&self) -> bool {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.notify.notify_waiters();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the token is cancelled, immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel()
            // cannot slip between the check and the await.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Translates platform termination signals into token cancellation.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel on behalf of `reason`. Repeated triggers are no-ops.
    pub fn trigger(&self, reason: &str) -> bool {
        if self.token.cancel() {
            info!("🛑 Shutdown requested ({reason}), stopping pacer and sender");
            true
        } else {
            debug!("🛑 Shutdown already in progress, ignoring {reason}");
            false
        }
    }

    /// Listen for SIGINT/SIGTERM for the life of the process. Every signal
    /// goes through [`trigger`](Self::trigger), so only the first one has
    /// an effect.
    pub async fn listen(self) -> RelayResult<()> {
        let mut signals = TerminationSignals::install()?;
        while let Some(name) = signals.recv().await {
            info!("📡 Received {name}");
            self.trigger(name);
        }
        Ok(())
    }
}

#[cfg(unix)]
struct TerminationSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn install() -> RelayResult<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| RelayError::signal(format!("Failed to setup SIGTERM handler: {e}")))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| RelayError::signal(format!("Failed to setup SIGINT handler: {e}")))?;
        Ok(Self { sigint, sigterm })
    }

    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            Some(()) = self.sigint.recv() => Some("SIGINT"),
            Some(()) = self.sigterm.recv() => Some("SIGTERM"),
            else => None,
        }
    }
}

#[cfg(not(unix))]
struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    fn install() -> RelayResult<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|()| "CTRL+C")
    }
}
