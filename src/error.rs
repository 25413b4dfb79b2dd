//! Error types for the CRPT API client.

use thiserror::Error;

/// Main error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A wait for a permit was cancelled before a permit was granted
    #[error("Interrupted while waiting for a rate limit permit")]
    InterruptedWait,

    /// The transport could not complete the call
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The document could not be encoded as JSON
    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client (or its gate) has begun shutting down
    #[error("Client shutdown in progress")]
    ShutdownInProgress,

    /// The refill driver was started after it had been stopped
    #[error("Refill driver already stopped")]
    DriverStopped,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a [`Transport`](crate::client::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    /// The request could not be built or sent, or no response arrived in time
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The transport was used after `close`
    #[error("Transport is closed")]
    Closed,

    /// Any other failure reported by a custom transport
    #[error("{0}")]
    Other(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
