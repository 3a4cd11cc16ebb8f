//! Graceful shutdown controller.
//!
//! Uses `ArcSwap` for lock-free health state transitions. The in-flight
//! counter is the one the pipeline maintains, so draining waits for exactly
//! the requests that still owe an audit record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Server health state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Listener not yet serving.
    Starting,
    /// Accepting and forwarding requests.
    Ready,
    /// No new connections; waiting for in-flight requests.
    Draining,
    /// All in-flight requests completed.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates readiness reporting and graceful shutdown.
///
/// 1. Health probes check `health_state()` to report readiness
/// 2. `trigger_shutdown()` moves to Draining and signals all listeners
/// 3. `wait_for_drain()` waits until the in-flight counter reaches zero
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    health_state: Arc<ArcSwap<HealthState>>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state observing `in_flight`.
    #[must_use]
    pub fn new(in_flight: Arc<AtomicU64>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            in_flight,
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Returns a receiver that will be notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Transitions to `Draining` and signals all shutdown receivers.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        // Receivers may have been dropped.
        let _ = self.shutdown_signal.send(true);
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight requests to complete, up to the given timeout.
    ///
    /// Returns `true` if all requests drained successfully (transitions to
    /// `Stopped` state). Returns `false` if the timeout expired (state
    /// remains `Draining`).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new(Arc::new(AtomicU64::new(0)))
    }
}
