//! Pool lifecycle events.
//!
//! A [`PoolEventListener`] registered on the pool observes every checkout,
//! checkin, connection creation and removal. Listeners are invoked inline
//! on the calling task and must not block.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectionPoolSettings;
use crate::connection::{ConnectionId, ServerId};
use crate::error::PoolError;

/// Why a checkout did not produce a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutFailure {
    /// Rejected by the waiter admission limit.
    WaitQueueFull,
    /// No capacity before the deadline.
    Timeout,
    /// Cancelled by the caller.
    Cancelled,
    /// The pool was disposed while waiting.
    PoolDisposed,
    /// Creating or opening the connection failed.
    ConnectionError,
}

impl From<&PoolError> for CheckOutFailure {
    fn from(err: &PoolError) -> Self {
        match err {
            PoolError::WaitQueueFull { .. } => Self::WaitQueueFull,
            PoolError::AcquireTimeout { .. } => Self::Timeout,
            PoolError::Cancelled => Self::Cancelled,
            PoolError::Disposed | PoolError::NotInitialized => Self::PoolDisposed,
            _ => Self::ConnectionError,
        }
    }
}

/// An observable pool event.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PoolEvent {
    /// `initialize` is starting the pool.
    Opening {
        /// Pool server.
        server_id: ServerId,
        /// Settings the pool runs with.
        settings: ConnectionPoolSettings,
    },
    /// The pool is open.
    Opened {
        /// Pool server.
        server_id: ServerId,
    },
    /// `dispose` is shutting the pool down.
    Closing {
        /// Pool server.
        server_id: ServerId,
    },
    /// The pool is disposed.
    Closed {
        /// Pool server.
        server_id: ServerId,
    },
    /// The generation was bumped.
    Cleared {
        /// Pool server.
        server_id: ServerId,
        /// Generation after the bump.
        generation: u64,
    },
    /// A caller started waiting for a connection.
    CheckingOut {
        /// Pool server.
        server_id: ServerId,
    },
    /// A caller is asking to join the wait queue.
    EnteringWaitQueue {
        /// Pool server.
        server_id: ServerId,
    },
    /// A caller joined the wait queue and may now wait for capacity.
    EnteredWaitQueue {
        /// Pool server.
        server_id: ServerId,
        /// Time spent joining.
        duration: Duration,
    },
    /// A caller obtained a connection.
    CheckedOut {
        /// Connection handed out.
        connection_id: ConnectionId,
        /// Time spent acquiring.
        duration: Duration,
    },
    /// A checkout failed.
    CheckOutFailed {
        /// Pool server.
        server_id: ServerId,
        /// Failure category.
        reason: CheckOutFailure,
    },
    /// A connection is being returned.
    CheckingIn {
        /// Connection being returned.
        connection_id: ConnectionId,
    },
    /// A connection was returned.
    CheckedIn {
        /// Connection returned.
        connection_id: ConnectionId,
        /// Time spent returning.
        duration: Duration,
    },
    /// A new connection is being created.
    Adding {
        /// Pool server.
        server_id: ServerId,
    },
    /// A new connection was created and opened.
    Added {
        /// New connection.
        connection_id: ConnectionId,
        /// Time spent creating and opening.
        duration: Duration,
    },
    /// A connection is being discarded.
    Removing {
        /// Connection being discarded.
        connection_id: ConnectionId,
    },
    /// A connection was discarded.
    Removed {
        /// Connection discarded.
        connection_id: ConnectionId,
        /// Time spent disposing.
        duration: Duration,
    },
}

/// Receives [`PoolEvent`]s.
pub trait PoolEventListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &PoolEvent);
}

impl<F> PoolEventListener for F
where
    F: Fn(&PoolEvent) + Send + Sync,
{
    fn on_event(&self, event: &PoolEvent) {
        self(event);
    }
}

/// Optional listener; events are only built when someone listens.
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    listener: Option<Arc<dyn PoolEventListener>>,
}

impl EventSink {
    pub(crate) fn new(listener: Option<Arc<dyn PoolEventListener>>) -> Self {
        Self { listener }
    }

    pub(crate) fn emit(&self, event: impl FnOnce() -> PoolEvent) {
        if let Some(listener) = &self.listener {
            listener.on_event(&event());
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::server_id;
    use parking_lot::Mutex;

    #[test]
    fn test_closure_listener_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_listener = Arc::clone(&seen);
        let sink = EventSink::new(Some(Arc::new(move |event: &PoolEvent| {
            seen_in_listener.lock().push(format!("{event:?}"));
        })));

        sink.emit(|| PoolEvent::Opened {
            server_id: server_id(),
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("Opened"));
    }

    #[test]
    fn test_sink_without_listener_skips_building_event() {
        let sink = EventSink::default();
        let mut built = false;
        sink.emit(|| {
            built = true;
            PoolEvent::Closed {
                server_id: server_id(),
            }
        });
        assert!(!built);
    }

    #[test]
    fn test_failure_reason_from_error() {
        assert_eq!(
            CheckOutFailure::from(&PoolError::Cancelled),
            CheckOutFailure::Cancelled
        );
        assert_eq!(
            CheckOutFailure::from(&PoolError::AcquireTimeout {
                elapsed: Duration::ZERO
            }),
            CheckOutFailure::Timeout
        );
        assert_eq!(
            CheckOutFailure::from(&PoolError::Disposed),
            CheckOutFailure::PoolDisposed
        );
    }
}
