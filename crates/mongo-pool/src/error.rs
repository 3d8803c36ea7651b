//! Pool error types.

use std::time::Duration;

use thiserror::Error;

use crate::connection::EndPoint;

/// Errors reported by the raw connection collaborator.
///
/// These are produced by the wire-protocol layer and are carried through
/// the pool unchanged inside [`PoolError::Connection`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Opening the connection (socket connect plus handshake) failed.
    #[error("failed to open connection to {endpoint}: {message}")]
    Open {
        /// Endpoint the connection was opened against.
        endpoint: EndPoint,
        /// Collaborator-supplied reason.
        message: String,
    },

    /// The connection was closed by the peer or was already disposed.
    #[error("connection closed")]
    Closed,

    /// Sending or receiving a message failed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The waiter admission limit was reached; the call was rejected
    /// without waiting.
    #[error("the wait queue for acquiring a connection to server {endpoint} is full")]
    WaitQueueFull {
        /// Endpoint of the exhausted pool.
        endpoint: EndPoint,
    },

    /// No connection became available before the deadline.
    #[error("timed out waiting for a connection after {}ms", elapsed.as_millis())]
    AcquireTimeout {
        /// Time spent waiting before giving up.
        elapsed: Duration,
    },

    /// The caller cancelled the acquisition.
    #[error("connection acquisition was cancelled")]
    Cancelled,

    /// The pool has not been initialized yet.
    #[error("connection pool must be initialized")]
    NotInitialized,

    /// The pool has been disposed.
    #[error("connection pool has been disposed")]
    Disposed,

    /// The handle has already been disposed.
    #[error("connection handle has been disposed")]
    HandleDisposed,

    /// The raw connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Check if this error is transient and may succeed on retry.
    ///
    /// The pool never retries on its own; callers decide using this.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WaitQueueFull { .. }
                | Self::AcquireTimeout { .. }
                | Self::Connection(ConnectionError::Io(_) | ConnectionError::Closed)
        )
    }

    /// Check if this error was caused by calling into the pool in the
    /// wrong lifecycle state.
    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::NotInitialized | Self::Disposed)
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
