//! Periodic quota refill.
//!
//! The driver owns a single background task that restores the gate's quota
//! once per window until it is stopped.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::gate::Gate;
use crate::error::{Error, Result};

/// Something the driver restores once per window.
pub trait Refill: Send + Sync + 'static {
    /// Restore the full quota.
    fn refill(&self) -> Result<()>;
}

impl Refill for Gate {
    fn refill(&self) -> Result<()> {
        self.replenish()
    }
}

/// Lifecycle of a [`RefillDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed, no timer yet
    Idle,
    /// Timer task is ticking
    Running,
    /// Terminal; the timer has been cancelled
    Stopped,
}

/// Background timer that refills a target every `window`.
pub struct RefillDriver {
    window: Duration,
    state: DriverState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
}

impl std::fmt::Debug for RefillDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefillDriver")
            .field("window", &self.window)
            .field("state", &self.state)
            .field("ticks", &self.ticks())
            .finish()
    }
}

impl RefillDriver {
    /// Create an idle driver for the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DriverState::Idle,
            cancel: CancellationToken::new(),
            handle: None,
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spawn the timer task. The first refill happens one full window
    /// after this call. Starting a running driver is a no-op.
    pub fn start<R: Refill>(&mut self, target: Arc<R>) -> Result<()> {
        match self.state {
            DriverState::Running => return Ok(()),
            DriverState::Stopped => return Err(Error::DriverStopped),
            DriverState::Idle => {}
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("refill driver needs a tokio runtime: {}", e)))?;

        info!(window_ms = self.window.as_millis() as u64, "Starting refill driver");

        self.handle = Some(runtime.spawn(run_refill_loop(
            self.window,
            target,
            self.cancel.clone(),
            self.ticks.clone(),
        )));
        self.state = DriverState::Running;
        Ok(())
    }

    /// Stop the timer, waiting at most `grace` for the task to finish
    /// before aborting it. Stopping twice is a no-op.
    pub async fn stop(&mut self, grace: Duration) {
        if self.state == DriverState::Stopped {
            return;
        }

        self.state = DriverState::Stopped;
        self.cancel.cancel();

        let Some(mut handle) = self.handle.take() else {
            debug!("Refill driver stopped before it was started");
            return;
        };

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => info!(ticks = self.ticks(), "Refill driver stopped"),
            Ok(Err(e)) => warn!(error = %e, "Refill driver task ended abnormally"),
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Refill driver did not stop within grace period, aborting"
                );
                handle.abort();
            }
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Number of ticks completed so far, failed ones included.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Drop for RefillDriver {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Tick loop. A single interval drives every tick, so ticks never overlap.
async fn run_refill_loop<R: Refill>(
    window: Duration,
    target: Arc<R>,
    cancel: CancellationToken,
    ticks: Arc<AtomicU64>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + window, window);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Refill loop cancelled");
                break;
            }
            _ = interval.tick() => {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| target.refill()));
                let tick = ticks.fetch_add(1, Ordering::SeqCst) + 1;

                match outcome {
                    Ok(Ok(())) => trace!(tick = tick, "Window refilled"),
                    Ok(Err(Error::ShutdownInProgress)) => {
                        debug!(tick = tick, "Refill target is shutting down")
                    }
                    Ok(Err(e)) => {
                        warn!(tick = tick, error = %e, "Refill tick failed, retrying next window")
                    }
                    Err(_) => error!(tick = tick, "Refill tick panicked, retrying next window"),
                }
            }
        }
    }
}
