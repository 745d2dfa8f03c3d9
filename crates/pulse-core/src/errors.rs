//! Error taxonomy for the connection lifecycle.
//!
//! - [`TransportError`]: failures reported by the underlying duplex stream
//! - [`ConnectionError`]: upgrade, read, write and liveness failures of one connection
//! - [`RegistryError`]: the registry's coordinating task is no longer running
//!
//! Every failure is local to one connection. Nothing here is retried.

use std::time::Duration;

use thiserror::Error;

/// Error reported by a duplex stream half.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the network closed the stream.
    #[error("stream closed")]
    Closed,
    /// The stream produced a protocol or I/O error.
    #[error("transport error: {0}")]
    Io(String),
}

/// Failure of a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The HTTP-to-duplex upgrade did not complete. No connection exists.
    #[error("protocol upgrade failed: {0}")]
    Upgrade(String),
    /// Reading a frame failed (peer disconnected, network error, protocol violation).
    #[error("read failed: {0}")]
    Read(#[source] TransportError),
    /// No frame arrived before the read deadline.
    #[error("read deadline exceeded")]
    ReadTimeout,
    /// Writing a frame failed.
    #[error("write failed: {0}")]
    Write(#[source] TransportError),
    /// The write did not complete within the write deadline.
    #[error("write deadline of {0:?} exceeded")]
    WriteTimeout(Duration),
    /// The connection is no longer active.
    #[error("connection is no longer active")]
    NotActive,
    /// The connection's stream was already closed locally.
    #[error("connection closed")]
    Closed,
    /// Heartbeat failures went over the configured maximum.
    #[error("heartbeat failed {failures} times (max {max})")]
    LivenessExceeded {
        /// Failure count when the threshold was crossed.
        failures: u32,
        /// Configured maximum.
        max: u32,
    },
}

impl ConnectionError {
    /// Whether the error was produced by the write path.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::Write(_) | Self::WriteTimeout(_) | Self::Closed)
    }
}

/// Error returned by registry handle calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The coordinating task has stopped; the request was not processed.
    #[error("connection registry has stopped")]
    Stopped,
}
