//! Connect Liveness Monitor
//!
//! Periodic check that the socket is still delivering connect responses.
//! Transport-level close/error events are not guaranteed to fire on every
//! dead socket, so the monitor independently verifies that a connect
//! response was seen within the server's advice timeout plus a grace
//! period, and forces a transport restart when it was not.
//!
//! The check is unconditional: it does not consult the transport's state
//! machine, so a stale connect timestamp triggers a restart even while a
//! handshake is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for the liveness monitor.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Interval between checks.
    pub check_interval: Duration,
    /// Grace period added to the server's advice timeout.
    pub grace: Duration,
    /// Advice timeout assumed until the server supplies one.
    pub default_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            grace: Duration::from_secs(5),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Events emitted by the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvent {
    /// No connect response within the allowed window; restart the
    /// transport.
    Stale,
}

/// State shared between the monitor and the transport's read loop.
#[derive(Debug)]
pub struct LivenessState {
    last_connect: RwLock<Instant>,
    /// Advice timeout in milliseconds, updated from connect responses.
    advice_timeout_ms: AtomicU64,
}

impl LivenessState {
    /// Create state with the clock starting now.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            last_connect: RwLock::new(Instant::now()),
            advice_timeout_ms: AtomicU64::new(u64::try_from(default_timeout.as_millis()).unwrap_or(u64::MAX)),
        }
    }

    /// Record a successful connect response.
    pub fn record_connect(&self) {
        *self.last_connect.write() = Instant::now();
    }

    /// Update the advice timeout from a server response.
    pub fn set_advice_timeout(&self, timeout: Duration) {
        self.advice_timeout_ms.store(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            Ordering::SeqCst,
        );
    }

    /// Time since the last connect response.
    #[must_use]
    pub fn time_since_connect(&self) -> Duration {
        self.last_connect.read().elapsed()
    }

    /// Current advice timeout.
    #[must_use]
    pub fn advice_timeout(&self) -> Duration {
        Duration::from_millis(self.advice_timeout_ms.load(Ordering::SeqCst))
    }

    /// Reset the clock for a new socket.
    pub fn reset(&self) {
        *self.last_connect.write() = Instant::now();
    }
}

/// Periodic connect-liveness monitor.
pub struct LivenessMonitor {
    config: LivenessConfig,
    state: Arc<LivenessState>,
    event_tx: mpsc::Sender<LivenessEvent>,
    cancel: CancellationToken,
}

impl LivenessMonitor {
    /// Create a new monitor.
    #[must_use]
    pub const fn new(
        config: LivenessConfig,
        state: Arc<LivenessState>,
        event_tx: mpsc::Sender<LivenessEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the monitoring loop until cancelled or staleness is detected.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Liveness monitor cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// One staleness check.
    ///
    /// Returns `Err(())` when the loop should exit.
    async fn check(&self) -> Result<(), ()> {
        let allowed = self.state.advice_timeout() + self.config.grace;
        let elapsed = self.state.time_since_connect();

        if elapsed > allowed {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis(),
                allowed_ms = allowed.as_millis(),
                "Connect liveness timeout detected"
            );
            let _ = self.event_tx.send(LivenessEvent::Stale).await;
            return Err(());
        }

        if self.event_tx.is_closed() {
            tracing::debug!("Event channel closed, stopping liveness monitor");
            return Err(());
        }

        Ok(())
    }
}
