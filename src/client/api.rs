//! Rate-limited registry client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::document;
use super::transport::{HttpTransport, Transport, TransportRequest};
use crate::config::{ClientConfig, RateLimitConfig};
use crate::error::{Error, Result};
use crate::ratelimit::{DriverState, Gate, RefillDriver};

/// How long cancelled submissions get to return their permits before the
/// transport is closed underneath them.
const CANCELLED_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for submitting documents to the registry under a rate limit.
///
/// At most `limit` submissions are admitted per window no matter how many
/// tasks share the client. The quota is restored by a background timer that
/// starts when the client is built, so a client must be created inside a
/// tokio runtime.
pub struct Client<T: Transport> {
    config: ClientConfig,
    gate: Arc<Gate>,
    driver: Mutex<RefillDriver>,
    transport: T,
    /// Set by the first `shutdown` call
    shutting_down: AtomicBool,
    /// Fired when in-flight calls outlive the shutdown grace period
    force_cancel: CancellationToken,
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("api_url", &self.config.api_url)
            .field("gate", &self.gate)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl Client<HttpTransport> {
    /// Create a client that talks to the registry over HTTP.
    pub fn http(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::from_config(&config)?;
        Self::with_config(config, transport)
    }
}

impl<T: Transport> Client<T> {
    /// Create a client admitting `limit` submissions per `window`.
    pub fn new(window: Duration, limit: u32, transport: T) -> Result<Self> {
        Self::with_config(ClientConfig::new(RateLimitConfig::new(window, limit)?), transport)
    }

    /// Create a client from full configuration.
    pub fn with_config(config: ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;

        let gate = Arc::new(Gate::new(config.rate_limit.limit)?);
        let mut driver = RefillDriver::new(config.rate_limit.window());
        driver.start(gate.clone())?;

        info!(
            api_url = %config.api_url,
            limit = config.rate_limit.limit,
            window_ms = config.rate_limit.window_ms,
            "Client initialized"
        );

        Ok(Self {
            config,
            gate,
            driver: Mutex::new(driver),
            transport,
            shutting_down: AtomicBool::new(false),
            force_cancel: CancellationToken::new(),
        })
    }

    /// Submit a document, waiting for a permit if the window is exhausted.
    ///
    /// Returns the registry's HTTP status code. Transport and serialization
    /// failures are returned as-is; nothing is retried.
    pub async fn submit<D>(&self, document: &D, signature: &str) -> Result<u16>
    where
        D: Serialize + ?Sized,
    {
        self.submit_inner(document, signature, None).await
    }

    /// Like [`submit`](Self::submit), but the permit wait is abandoned with
    /// [`Error::InterruptedWait`] when `cancel` fires.
    pub async fn submit_with_cancel<D>(
        &self,
        document: &D,
        signature: &str,
        cancel: &CancellationToken,
    ) -> Result<u16>
    where
        D: Serialize + ?Sized,
    {
        self.submit_inner(document, signature, Some(cancel)).await
    }

    #[instrument(
        skip(self, document, signature, cancel),
        fields(request_id = %Uuid::new_v4())
    )]
    async fn submit_inner<D>(
        &self,
        document: &D,
        signature: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<u16>
    where
        D: Serialize + ?Sized,
    {
        if self.is_shutting_down() {
            return Err(Error::ShutdownInProgress);
        }

        // Released on every path below when it goes out of scope
        let permit = match cancel {
            Some(token) => self.gate.acquire_with_cancel(token).await?,
            None => self.gate.acquire().await?,
        };

        debug!(available = self.gate.available(), "Permit granted");

        let body = document::serialize(document)?;
        let request = TransportRequest::json(self.config.api_url.as_str(), signature, body);

        let result = tokio::select! {
            result = self.transport.send(request) => result,
            _ = self.force_cancel.cancelled() => {
                warn!("Submission cancelled by shutdown");
                return Err(Error::ShutdownInProgress);
            }
        };

        permit.release();

        match result {
            Ok(status) => {
                debug!(status = status, "Document submitted");
                Ok(status)
            }
            Err(e) => {
                warn!(error = %e, "Document submission failed");
                Err(e.into())
            }
        }
    }

    /// Stop the refill timer, let in-flight submissions finish, then close
    /// the transport.
    ///
    /// Submissions waiting for a permit fail with
    /// [`Error::ShutdownInProgress`]. In-flight ones get the configured grace
    /// period before they are cancelled. Calling this again does nothing.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already requested");
            return Ok(());
        }

        let grace = self.config.shutdown_grace();
        info!(
            grace_secs = grace.as_secs(),
            in_flight = self.gate.in_flight(),
            "Shutting down client"
        );

        self.gate.close();
        self.driver.lock().await.stop(grace).await;

        if !self.gate.wait_idle(grace).await {
            warn!(
                in_flight = self.gate.in_flight(),
                "In-flight submissions did not finish within grace period, cancelling"
            );
            self.force_cancel.cancel();

            if !self.gate.wait_idle(CANCELLED_DRAIN_TIMEOUT).await {
                warn!(
                    in_flight = self.gate.in_flight(),
                    "Cancelled submissions still hold permits, closing transport anyway"
                );
            }
        }

        self.transport.close().await;

        info!("Client shut down");
        Ok(())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// The admission gate shared with the refill driver.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub async fn driver_state(&self) -> DriverState {
        self.driver.lock().await.state()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
