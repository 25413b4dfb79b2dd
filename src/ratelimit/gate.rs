//! Admission gate bounding how many calls may be admitted per window.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Mutable gate state; only ever touched under the gate's lock.
#[derive(Debug)]
struct GateState {
    /// Permits that may still be handed out, in `[0, limit]`
    available: u32,
    /// Permits currently held by callers
    in_flight: u32,
    /// Set once by `close`; no further permits are granted
    closed: bool,
}

/// A counting gate with a hard per-window quota.
///
/// Callers take a [`Permit`] before each call and give it back when the
/// call finishes. A refill resets the quota to `limit` rather than adding
/// to it, so permits still held across a refill are forgiven.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct Gate {
    limit: u32,
    state: Mutex<GateState>,
    /// Woken on release (one waiter), refill and close (all waiters)
    permits_available: Notify,
    /// Woken whenever the last held permit is returned
    idle: Notify,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Gate")
            .field("limit", &self.limit)
            .field("available", &state.available)
            .field("in_flight", &state.in_flight)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Gate {
    /// Create a gate holding `limit` permits.
    pub fn new(limit: u32) -> Result<Self> {
        if limit == 0 {
            return Err(Error::Config("gate limit must be at least 1".to_string()));
        }

        Ok(Self {
            limit,
            state: Mutex::new(GateState {
                available: limit,
                in_flight: 0,
                closed: false,
            }),
            permits_available: Notify::new(),
            idle: Notify::new(),
        })
    }

    /// Wait until a permit is available and take it.
    ///
    /// Dropping the returned future before it resolves consumes nothing.
    /// Fails with [`Error::ShutdownInProgress`] once the gate is closed.
    pub async fn acquire(&self) -> Result<Permit<'_>> {
        self.acquire_inner(None).await
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`Error::InterruptedWait`] when `cancel` fires first.
    pub async fn acquire_with_cancel(&self, cancel: &CancellationToken) -> Result<Permit<'_>> {
        self.acquire_inner(Some(cancel)).await
    }

    /// Take a permit only if one is available right now.
    pub fn try_acquire(&self) -> Result<Option<Permit<'_>>> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(Error::ShutdownInProgress);
        }
        if state.available == 0 {
            return Ok(None);
        }

        state.available -= 1;
        state.in_flight += 1;

        trace!(
            available = state.available,
            in_flight = state.in_flight,
            "Permit acquired"
        );

        Ok(Some(Permit { gate: self }))
    }

    async fn acquire_inner(&self, cancel: Option<&CancellationToken>) -> Result<Permit<'_>> {
        // Set while holding a `notify_one` wakeup we have not acted on yet
        let mut woken = false;

        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                if woken {
                    // Hand the wakeup to the next waiter instead of swallowing it
                    self.permits_available.notify_one();
                }
                debug!("Permit wait cancelled");
                return Err(Error::InterruptedWait);
            }

            // Register interest before checking so a release between the
            // check and the await is not missed.
            let notified = self.permits_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(permit) = self.try_acquire()? {
                return Ok(permit);
            }
            woken = false;

            trace!("No permits available, waiting");

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = &mut notified => woken = true,
                        // An unconsumed wakeup is forwarded when `notified` drops
                        _ = token.cancelled() => {
                            debug!("Permit wait cancelled");
                            return Err(Error::InterruptedWait);
                        }
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Return one permit, capped at `limit`.
    fn release(&self) {
        let (available, now_idle) = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.available = (state.available + 1).min(self.limit);
            (state.available, state.in_flight == 0)
        };

        trace!(available = available, "Permit released");

        self.permits_available.notify_one();
        if now_idle {
            self.idle.notify_waiters();
        }
    }

    /// Reset the quota to `limit` and wake every waiter.
    pub fn replenish(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::ShutdownInProgress);
            }
            std::mem::replace(&mut state.available, self.limit)
        };

        trace!(previous = previous, limit = self.limit, "Quota replenished");

        self.permits_available.notify_waiters();
        Ok(())
    }

    /// Stop granting permits. Pending and future acquires fail with
    /// [`Error::ShutdownInProgress`]; permits already held stay valid.
    pub fn close(&self) {
        let newly_closed = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };

        if newly_closed {
            debug!(limit = self.limit, "Gate closed");
            self.permits_available.notify_waiters();
        }
    }

    /// Wait until no permit is held, for at most `grace`.
    ///
    /// Returns `true` if the gate went idle in time.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(grace, drained).await.is_ok()
    }

    /// Permits that may be handed out right now.
    pub fn available(&self) -> u32 {
        self.state.lock().available
    }

    /// Permits currently held by callers.
    pub fn in_flight(&self) -> u32 {
        self.state.lock().in_flight
    }

    /// The configured per-window quota.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// One admitted call. Dropping the permit releases it back to its gate.
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit<'a> {
    gate: &'a Gate,
}

impl Permit<'_> {
    /// Release the permit now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").field("limit", &self.gate.limit).finish()
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
