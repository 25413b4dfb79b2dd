//! CRPT API - rate-limited document registration client
//!
//! This crate submits documents to a remote registration API while keeping
//! to a strict quota: at most `limit` requests are admitted per window, no
//! matter how many tasks share the client. A background timer restores the
//! full quota at the start of every window.

pub mod client;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use client::{Client, Document, HttpTransport, Transport};
pub use config::{ClientConfig, RateLimitConfig};
pub use error::{Error, Result, TransportError};
