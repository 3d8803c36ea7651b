//! Connection pool implementation.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::ConnectionPoolSettings;
use crate::connection::{ConnectionFactory, EndPoint, ServerId};
use crate::error::{PoolError, Result};
use crate::events::{CheckOutFailure, EventSink, PoolEvent, PoolEventListener};
use crate::handle::ConnectionHandle;
use crate::holder::ConnectionHolder;
use crate::lifecycle::{PoolState, PoolStateCell};
use crate::maintenance::MaintenanceLoop;
use crate::metrics::{PoolCounters, PoolMetrics, PoolStatus};
use crate::pooled::{ExpirationPolicy, Generation, PooledConnection};
use crate::semaphore::{EnterError, SlotSemaphore};

/// A bounded pool of connections to one server.
///
/// The pool hands out [`ConnectionHandle`]s. Two limits apply to callers:
/// at most `max_connections` handles' connections are checked out at once,
/// and at most `wait_queue_size` callers may be waiting inside
/// [`acquire_connection`](Self::acquire_connection) at once. Callers beyond
/// the second limit fail immediately with [`PoolError::WaitQueueFull`].
///
/// [`clear`](Self::clear) invalidates every existing connection in O(1) by
/// bumping the pool generation; stale connections are discarded lazily when
/// they are returned or pruned.
///
/// Cloning is cheap and shares the pool. The pool is disposed when
/// [`dispose`](Self::dispose) is called or the last clone is dropped.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    _owner: Arc<PoolOwner>,
}

/// Shared by every `ConnectionPool` clone and nothing else. The maintenance
/// task may still hold `PoolInner` when the last clone goes; this disposes
/// the pool regardless.
struct PoolOwner(Weak<PoolInner>);

impl Drop for PoolOwner {
    fn drop(&mut self) {
        if let Some(inner) = self.0.upgrade() {
            inner.shutdown();
        }
    }
}

pub(crate) struct PoolInner {
    pub(crate) server_id: ServerId,
    pub(crate) endpoint: EndPoint,
    pub(crate) settings: ConnectionPoolSettings,
    pub(crate) state: PoolStateCell,
    pub(crate) holder: ConnectionHolder,
    pub(crate) events: EventSink,
    pub(crate) counters: Arc<PoolCounters>,
    pub(crate) pool_capacity_semaphore: SlotSemaphore,
    pub(crate) waiter_admission_semaphore: SlotSemaphore,
    factory: Arc<dyn ConnectionFactory>,
    generation: Arc<Generation>,
    policy: ExpirationPolicy,
    maintenance: MaintenanceLoop,
}

/// Builder for [`ConnectionPool`].
pub struct ConnectionPoolBuilder {
    server_id: ServerId,
    endpoint: Option<EndPoint>,
    settings: ConnectionPoolSettings,
    factory: Arc<dyn ConnectionFactory>,
    listener: Option<Arc<dyn PoolEventListener>>,
}

impl ConnectionPoolBuilder {
    /// Connect to an endpoint other than the one in the server identity.
    #[must_use]
    pub fn endpoint(mut self, endpoint: EndPoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Use these settings instead of the defaults.
    #[must_use]
    pub fn settings(mut self, settings: ConnectionPoolSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Register an event listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn PoolEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validate the settings and build the pool in the `Initial` state.
    pub fn build(self) -> Result<ConnectionPool> {
        self.settings.validate()?;

        let endpoint = self
            .endpoint
            .unwrap_or_else(|| self.server_id.endpoint().clone());
        let events = EventSink::new(self.listener);
        let counters = Arc::new(PoolCounters::default());
        let max_connections = self.settings.max_connections() as usize;
        let wait_queue_size = self.settings.wait_queue_size() as usize;

        let inner = PoolInner {
            holder: ConnectionHolder::new(events.clone(), Arc::clone(&counters)),
            pool_capacity_semaphore: SlotSemaphore::new("pool_capacity", max_connections),
            waiter_admission_semaphore: SlotSemaphore::new("waiter_admission", wait_queue_size),
            policy: ExpirationPolicy::from(&self.settings),
            server_id: self.server_id,
            endpoint,
            settings: self.settings,
            state: PoolStateCell::new(),
            events,
            counters,
            factory: self.factory,
            generation: Arc::new(Generation::default()),
            maintenance: MaintenanceLoop::new(),
        };

        let inner = Arc::new(inner);
        Ok(ConnectionPool {
            _owner: Arc::new(PoolOwner(Arc::downgrade(&inner))),
            inner,
        })
    }
}

impl ConnectionPool {
    /// Create a pool with the given settings.
    pub fn new(
        server_id: ServerId,
        settings: ConnectionPoolSettings,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        Self::builder(server_id, factory).settings(settings).build()
    }

    /// Start building a pool.
    pub fn builder(server_id: ServerId, factory: Arc<dyn ConnectionFactory>) -> ConnectionPoolBuilder {
        ConnectionPoolBuilder {
            server_id,
            endpoint: None,
            settings: ConnectionPoolSettings::default(),
            factory,
            listener: None,
        }
    }

    /// Open the pool and start the maintenance loop.
    ///
    /// Calling this on an open pool does nothing. When maintenance is
    /// enabled this must run inside a Tokio runtime.
    pub fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        inner.state.ensure_not_disposed()?;

        let interval = inner.settings.maintenance_interval();
        if interval.is_some() && tokio::runtime::Handle::try_current().is_err() {
            return Err(PoolError::Configuration(
                "initialize requires a Tokio runtime when maintenance is enabled".into(),
            ));
        }

        if !inner.state.try_transition(PoolState::Initial, PoolState::Open) {
            return inner.state.ensure_not_disposed();
        }

        inner.events.emit(|| PoolEvent::Opening {
            server_id: inner.server_id.clone(),
            settings: inner.settings.clone(),
        });
        if let Some(interval) = interval {
            inner.maintenance.start(Arc::downgrade(inner), interval);
        }
        tracing::info!(
            server = %inner.server_id,
            max_connections = inner.settings.max_connections(),
            min_connections = inner.settings.min_connections(),
            "connection pool opened"
        );
        inner.events.emit(|| PoolEvent::Opened {
            server_id: inner.server_id.clone(),
        });
        Ok(())
    }

    /// Check out a connection, waiting at most `timeout` for capacity.
    ///
    /// Fails immediately with [`PoolError::WaitQueueFull`] when too many
    /// callers are already waiting. No capacity is leaked on any error,
    /// including cancellation and dropping the returned future.
    pub async fn acquire_connection(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ConnectionHandle> {
        let inner = &self.inner;
        inner.state.ensure_open()?;

        inner.events.emit(|| PoolEvent::CheckingOut {
            server_id: inner.server_id.clone(),
        });
        let started = Instant::now();
        let result = inner.check_out(timeout, cancel, started).await;

        match &result {
            Ok(handle) => {
                inner.counters.checkout_succeeded();
                tracing::trace!(
                    connection_id = %handle.connection_id(),
                    elapsed = ?started.elapsed(),
                    "checked out connection"
                );
                inner.events.emit(|| PoolEvent::CheckedOut {
                    connection_id: handle.connection_id().clone(),
                    duration: started.elapsed(),
                });
            }
            Err(err) => {
                match err {
                    PoolError::WaitQueueFull { .. } => inner.counters.wait_queue_rejected(),
                    PoolError::AcquireTimeout { .. } => inner.counters.acquire_timed_out(),
                    PoolError::Cancelled => inner.counters.acquire_cancelled(),
                    _ => inner.counters.checkout_failed(),
                }
                tracing::debug!(server = %inner.server_id, error = %err, "checkout failed");
                inner.events.emit(|| PoolEvent::CheckOutFailed {
                    server_id: inner.server_id.clone(),
                    reason: CheckOutFailure::from(err),
                });
            }
        }
        result
    }

    /// Check out a connection using the configured wait-queue timeout.
    pub async fn acquire(&self) -> Result<ConnectionHandle> {
        let cancel = CancellationToken::new();
        self.acquire_connection(self.inner.settings.wait_queue_timeout(), &cancel)
            .await
    }

    /// Invalidate every existing connection by bumping the generation.
    ///
    /// Connections are not closed here; each is discarded when it is next
    /// returned or pruned.
    pub fn clear(&self) -> Result<()> {
        let inner = &self.inner;
        inner.state.ensure_open()?;
        let generation = inner.generation.increment();
        tracing::info!(server = %inner.server_id, generation, "connection pool cleared");
        inner.events.emit(|| PoolEvent::Cleared {
            server_id: inner.server_id.clone(),
            generation,
        });
        Ok(())
    }

    /// Shut the pool down. A second call does nothing.
    ///
    /// Idle connections are closed now; checked-out connections are closed
    /// when their last handle is disposed.
    pub fn dispose(&self) {
        self.inner.shutdown();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.state.get()
    }

    /// Server this pool connects to.
    #[must_use]
    pub fn server_id(&self) -> &ServerId {
        &self.inner.server_id
    }

    /// Endpoint this pool connects to.
    #[must_use]
    pub fn endpoint(&self) -> &EndPoint {
        &self.inner.endpoint
    }

    /// Settings the pool was built with.
    #[must_use]
    pub fn settings(&self) -> &ConnectionPoolSettings {
        &self.inner.settings
    }

    /// Free capacity slots.
    #[must_use]
    pub fn available_count(&self) -> u32 {
        self.inner.available_count()
    }

    /// Capacity slots currently taken.
    ///
    /// This counts held slots, not physical connections: a slot taken by a
    /// waiter that is still opening, or briefly by the maintenance loop while
    /// it prunes, is included.
    #[must_use]
    pub fn used_count(&self) -> u32 {
        self.inner.used_count()
    }

    /// Connections idle in the pool.
    #[must_use]
    pub fn dormant_count(&self) -> u32 {
        self.inner.dormant_count()
    }

    /// `used_count + dormant_count`.
    ///
    /// Inherits the slot counting of [`used_count`](Self::used_count), so a
    /// pool with no physical connections can report 1 during a prune.
    #[must_use]
    pub fn created_count(&self) -> u32 {
        self.inner.created_count()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.current()
    }

    /// Snapshot of the gauges.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let in_use = inner.used_count();
        let idle = inner.dormant_count();
        PoolStatus {
            available: inner.available_count(),
            in_use,
            idle,
            created: in_use + idle,
            max: inner.settings.max_connections(),
            generation: inner.generation.current(),
        }
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.counters.snapshot()
    }
}

#[cfg(test)]
impl ConnectionPool {
    pub(crate) fn inner_for_tests(&self) -> &Arc<PoolInner> {
        &self.inner
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("server_id", &self.inner.server_id)
            .field("state", &self.inner.state.get())
            .field("status", &self.status())
            .finish()
    }
}

impl PoolInner {
    pub(crate) fn available_count(&self) -> u32 {
        u32::try_from(self.pool_capacity_semaphore.available()).unwrap_or(u32::MAX)
    }

    pub(crate) fn used_count(&self) -> u32 {
        self.settings
            .max_connections()
            .saturating_sub(self.available_count())
    }

    pub(crate) fn dormant_count(&self) -> u32 {
        u32::try_from(self.holder.count()).unwrap_or(u32::MAX)
    }

    pub(crate) fn created_count(&self) -> u32 {
        self.used_count() + self.dormant_count()
    }

    async fn check_out(
        self: &Arc<Self>,
        timeout: Duration,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ConnectionHandle> {
        self.events.emit(|| PoolEvent::EnteringWaitQueue {
            server_id: self.server_id.clone(),
        });
        let _admission = self
            .waiter_admission_semaphore
            .try_enter()
            .map_err(|err| match err {
                EnterError::Closed => PoolError::Disposed,
                EnterError::Timeout | EnterError::Cancelled => PoolError::WaitQueueFull {
                    endpoint: self.endpoint.clone(),
                },
            })?;
        self.events.emit(|| PoolEvent::EnteredWaitQueue {
            server_id: self.server_id.clone(),
            duration: started.elapsed(),
        });

        let remaining = timeout.saturating_sub(started.elapsed());
        let capacity = self
            .pool_capacity_semaphore
            .enter(remaining, cancel)
            .await
            .map_err(|err| acquire_error(err, started))?;

        let connection = match self.holder.acquire() {
            Some(connection) => connection,
            None => {
                let remaining = timeout.saturating_sub(started.elapsed());
                self.open_new_connection(remaining, cancel, started).await?
            }
        };

        if self.state.get().is_disposed() {
            self.holder.discard(&connection);
            return Err(PoolError::Disposed);
        }

        capacity.detach();
        Ok(ConnectionHandle::new(connection, Arc::downgrade(self)))
    }

    /// Create a connection through the factory and open it.
    ///
    /// A connection that fails to open, or whose opening future is dropped,
    /// is discarded through the holder.
    pub(crate) async fn open_new_connection(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<Arc<PooledConnection>> {
        self.events.emit(|| PoolEvent::Adding {
            server_id: self.server_id.clone(),
        });
        let opening = Instant::now();
        let raw = self
            .factory
            .create_connection(&self.server_id, &self.endpoint);
        let guard = OpeningGuard::new(
            &self.holder,
            Arc::new(PooledConnection::new(
                raw,
                Arc::clone(&self.generation),
                self.policy,
            )),
        );
        self.counters.connection_created();
        let connection = guard.connection();

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PoolError::Cancelled),
            opened = tokio::time::timeout(timeout, connection.open(timeout, cancel)) => match opened {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(PoolError::Connection(err)),
                Err(_) => Err(PoolError::AcquireTimeout {
                    elapsed: started.elapsed(),
                }),
            },
        };

        if let Err(err) = opened {
            tracing::debug!(
                connection_id = %connection.connection_id(),
                error = %err,
                "failed to open connection"
            );
            return Err(err);
        }

        tracing::debug!(
            connection_id = %connection.connection_id(),
            generation = connection.generation(),
            elapsed = ?opening.elapsed(),
            "opened new connection"
        );
        self.events.emit(|| PoolEvent::Added {
            connection_id: connection.connection_id().clone(),
            duration: opening.elapsed(),
        });
        Ok(guard.opened())
    }

    /// Take back a connection whose last handle was disposed.
    pub(crate) fn release_connection(&self, connection: Arc<PooledConnection>) {
        let connection_id = connection.connection_id().clone();
        self.events.emit(|| PoolEvent::CheckingIn {
            connection_id: connection_id.clone(),
        });
        let started = Instant::now();

        if self.state.get().is_disposed() {
            self.holder.discard(&connection);
        } else {
            self.holder.return_connection(connection);
            // dispose may have drained the holder between the check and the push
            if self.state.get().is_disposed() {
                self.holder.clear();
            }
        }
        self.pool_capacity_semaphore.release();

        tracing::trace!(connection_id = %connection_id, "checked in connection");
        self.events.emit(|| PoolEvent::CheckedIn {
            connection_id,
            duration: started.elapsed(),
        });
    }

    #[cfg(test)]
    pub(crate) fn maintenance_for_tests(&self) -> &MaintenanceLoop {
        &self.maintenance
    }

    fn shutdown(&self) {
        if !self.state.try_dispose() {
            return;
        }
        self.events.emit(|| PoolEvent::Closing {
            server_id: self.server_id.clone(),
        });
        self.maintenance.stop();
        self.holder.clear();
        self.pool_capacity_semaphore.close();
        self.waiter_admission_semaphore.close();
        tracing::info!(server = %self.server_id, "connection pool disposed");
        self.events.emit(|| PoolEvent::Closed {
            server_id: self.server_id.clone(),
        });
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Discards a connection through the holder unless it finished opening.
struct OpeningGuard<'a> {
    holder: &'a ConnectionHolder,
    connection: Arc<PooledConnection>,
    armed: bool,
}

impl<'a> OpeningGuard<'a> {
    fn new(holder: &'a ConnectionHolder, connection: Arc<PooledConnection>) -> Self {
        Self {
            holder,
            connection,
            armed: true,
        }
    }

    fn connection(&self) -> &Arc<PooledConnection> {
        &self.connection
    }

    fn opened(mut self) -> Arc<PooledConnection> {
        self.armed = false;
        Arc::clone(&self.connection)
    }
}

impl Drop for OpeningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.holder.discard(&self.connection);
        }
    }
}

fn acquire_error(err: EnterError, started: Instant) -> PoolError {
    match err {
        EnterError::Timeout => PoolError::AcquireTimeout {
            elapsed: started.elapsed(),
        },
        EnterError::Cancelled => PoolError::Cancelled,
        EnterError::Closed => PoolError::Disposed,
    }
}
