//! Crate-wide error taxonomy.
//!
//! Each subsystem defines its own narrow error enum at its boundary
//! (see `message::CodecError`, `connection::ConnectionError`,
//! `comm::CommError`, `aggregation::AggregationError`); this module
//! unifies them into the single `Error` that crosses component
//! boundaries into the round loop: only round-loop fatalities ever
//! propagate further than a log line and a metric bump.

use std::net::SocketAddr;
use thiserror::Error;

use crate::aggregation::AggregationError;
use crate::comm::CommError;
use crate::connection::ConnectionError;
use crate::message::CodecError;

/// Specialised `Result` alias for the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type. Variants map to the taxonomy in the design's
/// error-handling section: transient I/O, protocol, semantic,
/// resource and fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire codec failure (protocol category).
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Per-connection failure (transient I/O or protocol category).
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Communications manager failure.
    #[error("communications error: {0}")]
    Comm(#[from] CommError),

    /// Aggregation buffer or aggregator failure.
    #[error("aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// Configuration could not be loaded or was invalid (exit code 1).
    #[error("configuration error: {0}")]
    Config(String),

    /// A fatal, unrecoverable round-loop error (exit code 2): aggregation
    /// incompatibility, a corrupted local model, or an event-bus failure
    /// that could not be isolated to a single subscriber.
    #[error("fatal runtime error: {0}")]
    Fatal(String),

    /// A resource limit was hit; the node degrades but keeps running.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// An I/O error not otherwise categorised.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code this error should surface as, if it reaches
    /// `main`. Non-fatal errors are handled internally and never
    /// returned to `main`, so this is only meaningful for `Config`
    /// and `Fatal`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            Error::Fatal(_) => 2,
            _ => 2,
        }
    }
}

/// A transient failure talking to a single peer. Callers log and let
/// heartbeat-based pruning take care of eventually removing the peer
/// rather than treating this as fatal.
#[derive(Debug, Error)]
#[error("transient failure reaching {addr}: {reason}")]
pub struct PeerIoError {
    pub addr: SocketAddr,
    pub reason: String,
}
