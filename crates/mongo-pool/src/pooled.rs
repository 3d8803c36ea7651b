//! Pooled connection records.
//!
//! A [`PooledConnection`] wraps one raw connection together with the
//! bookkeeping the pool needs to decide when it may no longer be reused:
//! creation time, last use, the generation it was created under and the
//! number of live handles referencing it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionPoolSettings;
use crate::connection::{ConnectionId, RawConnection, RequestMessage, ResponseMessage};
use crate::error::ConnectionError;

/// Monotonic pool epoch.
///
/// Shared between the pool and its connections so a connection can compare
/// its creation generation against the current one without holding a
/// reference to the pool.
#[derive(Debug, Default)]
pub(crate) struct Generation(AtomicU64);

impl Generation {
    pub(crate) fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Bump the epoch and return the new value.
    pub(crate) fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Age limits applied to every connection of a pool.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExpirationPolicy {
    pub(crate) max_idle_time: Duration,
    pub(crate) max_life_time: Duration,
}

impl From<&ConnectionPoolSettings> for ExpirationPolicy {
    fn from(settings: &ConnectionPoolSettings) -> Self {
        Self {
            max_idle_time: settings.max_idle_time(),
            max_life_time: settings.max_life_time(),
        }
    }
}

/// One physical connection owned by the pool.
pub(crate) struct PooledConnection {
    raw: Box<dyn RawConnection>,
    created_at: Instant,
    last_used_at: Mutex<Instant>,
    generation: u64,
    pool_generation: Arc<Generation>,
    policy: ExpirationPolicy,
    references: AtomicUsize,
    disposed: AtomicBool,
}

impl PooledConnection {
    pub(crate) fn new(
        raw: Box<dyn RawConnection>,
        pool_generation: Arc<Generation>,
        policy: ExpirationPolicy,
    ) -> Self {
        let now = Instant::now();
        Self {
            raw,
            created_at: now,
            last_used_at: Mutex::new(now),
            generation: pool_generation.current(),
            pool_generation,
            policy,
            references: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn connection_id(&self) -> &ConnectionId {
        self.raw.connection_id()
    }

    /// Generation the connection was created under.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn idle_time(&self) -> Duration {
        self.last_used_at.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_used_at.lock() = Instant::now();
    }

    /// Whether the connection must not be handed out again.
    pub(crate) fn is_expired(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
            || self.generation < self.pool_generation.current()
            || self.idle_time() > self.policy.max_idle_time
            || self.age() > self.policy.max_life_time
            || self.raw.is_expired()
    }

    pub(crate) async fn open(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        self.raw.open(timeout, cancel).await?;
        self.touch();
        Ok(())
    }

    pub(crate) async fn send_messages(
        &self,
        messages: Vec<RequestMessage>,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        self.touch();
        let result = self.raw.send_messages(messages, cancel).await;
        self.touch();
        result
    }

    pub(crate) async fn receive_message(
        &self,
        response_to: i32,
        cancel: &CancellationToken,
    ) -> Result<ResponseMessage, ConnectionError> {
        self.touch();
        let result = self.raw.receive_message(response_to, cancel).await;
        self.touch();
        result
    }

    /// Register one more handle; returns the new count.
    pub(crate) fn add_reference(&self) -> usize {
        self.references.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one handle; returns `true` when it was the last.
    pub(crate) fn remove_reference(&self) -> bool {
        self.references.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn reference_count(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Close the raw connection; returns `true` for the call that did it.
    pub(crate) fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::trace!(connection_id = %self.connection_id(), "disposing connection");
        self.raw.dispose();
        true
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection_id", self.connection_id())
            .field("generation", &self.generation)
            .field("references", &self.reference_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // dropped without going through the holder
        if !self.disposed.load(Ordering::Acquire) {
            self.raw.dispose();
        }
    }
}
