//! Handles to checked-out connections.

use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionId, RequestMessage, ResponseMessage};
use crate::error::PoolError;
use crate::lifecycle::HandleState;
use crate::pool::PoolInner;
use crate::pooled::PooledConnection;

/// Exclusive (but forkable) access to one pooled connection.
///
/// Every handle holds one reference on its connection. [`fork`](Self::fork)
/// adds another handle to the same physical connection; the connection goes
/// back to the pool only when the last handle is disposed. Dropping a handle
/// disposes it.
///
/// The handle keeps only a weak reference to its pool, so an outstanding
/// handle never keeps a dropped pool alive.
pub struct ConnectionHandle {
    connection: Arc<PooledConnection>,
    pool: Weak<PoolInner>,
    state: HandleState,
}

impl ConnectionHandle {
    pub(crate) fn new(connection: Arc<PooledConnection>, pool: Weak<PoolInner>) -> Self {
        connection.add_reference();
        Self {
            connection,
            pool,
            state: HandleState::Live,
        }
    }

    /// Identity of the underlying connection.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        self.connection.connection_id()
    }

    /// Generation the underlying connection was created under.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.connection.generation()
    }

    /// Current handle state.
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Whether the connection should no longer be used.
    ///
    /// True once the connection itself expired or its pool was disposed
    /// or dropped.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let pool_gone = self
            .pool
            .upgrade()
            .is_none_or(|pool| pool.state.get().is_disposed());
        pool_gone || self.connection.is_expired()
    }

    /// Create another handle sharing this physical connection.
    pub fn fork(&self) -> Result<Self, PoolError> {
        self.ensure_live()?;
        Ok(Self::new(Arc::clone(&self.connection), self.pool.clone()))
    }

    /// Send a batch of requests.
    pub async fn send_messages(
        &self,
        messages: Vec<RequestMessage>,
        cancel: &CancellationToken,
    ) -> Result<(), PoolError> {
        self.ensure_live()?;
        Ok(self.connection.send_messages(messages, cancel).await?)
    }

    /// Read the reply to `response_to`.
    pub async fn receive_message(
        &self,
        response_to: i32,
        cancel: &CancellationToken,
    ) -> Result<ResponseMessage, PoolError> {
        self.ensure_live()?;
        Ok(self.connection.receive_message(response_to, cancel).await?)
    }

    /// Release this handle's reference. A second call does nothing.
    pub fn dispose(&mut self) {
        if !self.state.is_live() {
            return;
        }
        self.state = HandleState::Disposed;

        if !self.connection.remove_reference() {
            tracing::trace!(
                connection_id = %self.connection_id(),
                references = self.connection.reference_count(),
                "handle disposed; connection still referenced"
            );
            return;
        }

        match self.pool.upgrade() {
            Some(pool) => pool.release_connection(Arc::clone(&self.connection)),
            None => {
                self.connection.dispose();
            }
        }
    }

    fn ensure_live(&self) -> Result<(), PoolError> {
        if self.state.is_live() {
            Ok(())
        } else {
            Err(PoolError::HandleDisposed)
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection_id", self.connection_id())
            .field("state", &self.state)
            .finish()
    }
}
