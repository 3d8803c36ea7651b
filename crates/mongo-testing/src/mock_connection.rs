//! Mock connections for exercising the pool without a server.
//!
//! [`MockConnectionFactory`] hands out [`MockConnection`]s that echo every
//! request payload back as the matching reply. Each connection can be
//! inspected and steered after creation through its [`MockProbe`]: opens
//! can be delayed or made to fail, and individual connections can be marked
//! broken.
//!
//! ```rust,ignore
//! use mongo_testing::MockConnectionFactory;
//!
//! let factory = MockConnectionFactory::builder()
//!     .with_open_delay(Duration::from_millis(5))
//!     .build();
//! let pool = ConnectionPool::new(server_id, settings, factory.clone())?;
//! // ...
//! assert_eq!(factory.disposed_count(), 0);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use mongo_driver_pool::{
    CancellationToken, ConnectionError, ConnectionFactory, ConnectionId, EndPoint, RawConnection,
    RequestMessage, ResponseMessage, ServerId,
};
use parking_lot::Mutex;

/// Behavior applied to connections created by a [`MockConnectionFactory`].
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// How long `open` takes.
    pub open_delay: Duration,
    /// Whether `open` fails.
    pub fail_open: bool,
    /// How long `receive_message` takes.
    pub receive_delay: Duration,
}

/// Builder for [`MockConnectionFactory`].
#[derive(Debug, Default)]
pub struct MockFactoryBuilder {
    config: MockConfig,
}

impl MockFactoryBuilder {
    /// Create a builder for instant, always-successful connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `open`.
    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.config.open_delay = delay;
        self
    }

    /// Make every `open` fail.
    #[must_use]
    pub fn with_failing_opens(mut self) -> Self {
        self.config.fail_open = true;
        self
    }

    /// Delay every `receive_message`.
    #[must_use]
    pub fn with_receive_delay(mut self, delay: Duration) -> Self {
        self.config.receive_delay = delay;
        self
    }

    /// Build the factory.
    #[must_use]
    pub fn build(self) -> Arc<MockConnectionFactory> {
        Arc::new(MockConnectionFactory {
            config: Mutex::new(self.config),
            next_id: AtomicU64::new(0),
            probes: Mutex::new(Vec::new()),
        })
    }
}

/// Connection factory producing [`MockConnection`]s.
#[derive(Debug)]
pub struct MockConnectionFactory {
    config: Mutex<MockConfig>,
    next_id: AtomicU64,
    probes: Mutex<Vec<MockProbe>>,
}

impl MockConnectionFactory {
    /// Start building a factory.
    #[must_use]
    pub fn builder() -> MockFactoryBuilder {
        MockFactoryBuilder::new()
    }

    /// A factory with default behavior.
    #[must_use]
    pub fn new() -> Arc<Self> {
        MockFactoryBuilder::new().build()
    }

    /// Change whether connections created from now on fail to open.
    pub fn set_fail_open(&self, fail: bool) {
        self.config.lock().fail_open = fail;
    }

    /// Change the open delay for connections created from now on.
    pub fn set_open_delay(&self, delay: Duration) {
        self.config.lock().open_delay = delay;
    }

    /// Probe for the `index`-th created connection.
    #[must_use]
    pub fn probe(&self, index: usize) -> Option<MockProbe> {
        self.probes.lock().get(index).cloned()
    }

    /// Probes for every created connection, in creation order.
    #[must_use]
    pub fn probes(&self) -> Vec<MockProbe> {
        self.probes.lock().clone()
    }

    /// Connections created so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.probes.lock().len()
    }

    /// Connections currently open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.probes.lock().iter().filter(|p| p.is_open()).count()
    }

    /// Connections disposed so far.
    #[must_use]
    pub fn disposed_count(&self) -> usize {
        self.probes.lock().iter().filter(|p| p.is_disposed()).count()
    }

    /// Connections created and not yet disposed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.created_count() - self.disposed_count()
    }
}

impl ConnectionFactory for MockConnectionFactory {
    fn create_connection(&self, server_id: &ServerId, _endpoint: &EndPoint) -> Box<dyn RawConnection> {
        let local_value = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let probe = MockProbe {
            state: Arc::new(ProbeState::default()),
        };
        let connection = MockConnection {
            id: ConnectionId::new(server_id.clone(), local_value),
            config: self.config.lock().clone(),
            state: Arc::clone(&probe.state),
            pending: Mutex::new(HashMap::new()),
        };
        tracing::trace!(connection_id = %connection.id, "mock connection created");
        self.probes.lock().push(probe);
        Box::new(connection)
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    open: AtomicBool,
    expired: AtomicBool,
    disposed: AtomicBool,
    open_calls: AtomicUsize,
    dispose_calls: AtomicUsize,
    sent: Mutex<Vec<RequestMessage>>,
}

/// Observes and steers one [`MockConnection`].
#[derive(Debug, Clone)]
pub struct MockProbe {
    state: Arc<ProbeState>,
}

impl MockProbe {
    /// Mark the connection broken; the pool will treat it as expired.
    pub fn expire(&self) {
        self.state.expired.store(true, Ordering::SeqCst);
    }

    /// Whether `open` succeeded.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Whether `dispose` was called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }

    /// Number of `open` calls.
    #[must_use]
    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    /// Number of `dispose` calls.
    #[must_use]
    pub fn dispose_calls(&self) -> usize {
        self.state.dispose_calls.load(Ordering::SeqCst)
    }

    /// Request ids sent on the connection, in order.
    #[must_use]
    pub fn sent_request_ids(&self) -> Vec<i32> {
        self.state.sent.lock().iter().map(|m| m.request_id).collect()
    }
}

/// Raw connection that echoes request payloads.
#[derive(Debug)]
pub struct MockConnection {
    id: ConnectionId,
    config: MockConfig,
    state: Arc<ProbeState>,
    pending: Mutex<HashMap<i32, Bytes>>,
}

impl MockConnection {
    fn ensure_usable(&self) -> Result<(), ConnectionError> {
        if self.state.disposed.load(Ordering::SeqCst) || !self.state.open.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RawConnection for MockConnection {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    async fn open(&self, _timeout: Duration, cancel: &CancellationToken) -> Result<(), ConnectionError> {
        self.state.open_calls.fetch_add(1, Ordering::SeqCst);
        if !self.config.open_delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(ConnectionError::Closed),
                () = tokio::time::sleep(self.config.open_delay) => {}
            }
        }
        if self.config.fail_open {
            return Err(ConnectionError::Open {
                endpoint: self.id.server_id().endpoint().clone(),
                message: "mock open failure".into(),
            });
        }
        self.state.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_messages(
        &self,
        messages: Vec<RequestMessage>,
        _cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        self.ensure_usable()?;
        let mut pending = self.pending.lock();
        for message in &messages {
            pending.insert(message.request_id, message.payload.clone());
        }
        drop(pending);
        self.state.sent.lock().extend(messages);
        Ok(())
    }

    async fn receive_message(
        &self,
        response_to: i32,
        cancel: &CancellationToken,
    ) -> Result<ResponseMessage, ConnectionError> {
        self.ensure_usable()?;
        if !self.config.receive_delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(ConnectionError::Closed),
                () = tokio::time::sleep(self.config.receive_delay) => {}
            }
        }
        let payload = self.pending.lock().remove(&response_to).ok_or_else(|| {
            ConnectionError::Protocol(format!("no request with id {response_to} is pending"))
        })?;
        Ok(ResponseMessage::new(response_to, payload))
    }

    fn is_expired(&self) -> bool {
        self.state.expired.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.state.dispose_calls.fetch_add(1, Ordering::SeqCst);
        self.state.disposed.store(true, Ordering::SeqCst);
        self.state.open.store(false, Ordering::SeqCst);
    }
}
