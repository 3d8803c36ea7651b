//! Test fixture utilities.

use std::sync::Arc;
use std::time::Duration;

use mongo_driver_pool::{
    ClusterId, ConnectionFactory, ConnectionPool, ConnectionPoolSettings, EndPoint, PoolEvent,
    PoolEventListener, Result, ServerId,
};
use parking_lot::Mutex;

use crate::mock_connection::MockConnectionFactory;

/// Server identity on `localhost:27017` in cluster 1.
#[must_use]
pub fn server_id() -> ServerId {
    server_id_on(27017)
}

/// Server identity on `localhost:{port}` in cluster 1.
#[must_use]
pub fn server_id_on(port: u16) -> ServerId {
    ServerId::new(ClusterId(1), EndPoint::new("localhost", port))
}

/// Settings sized for tests: small pool, short timeouts, no maintenance.
#[must_use]
pub fn test_settings(max_connections: u32) -> ConnectionPoolSettings {
    ConnectionPoolSettings::new()
        .with_max_connections(max_connections)
        .with_wait_queue_size(max_connections * 5)
        .with_wait_queue_timeout(Duration::from_secs(2))
        .with_connect_timeout(Duration::from_secs(2))
        .without_maintenance()
}

/// Listener that keeps every event it sees.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<PoolEvent>>,
}

impl EventRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Clone of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().clone()
    }

    /// Count of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&PoolEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        self.events.lock().clear();
    }
}

impl PoolEventListener for EventRecorder {
    fn on_event(&self, event: &PoolEvent) {
        self.events.lock().push(event.clone());
    }
}

/// An initialized pool wired to a mock factory and an event recorder.
pub struct PoolFixture {
    /// The pool under test.
    pub pool: ConnectionPool,
    /// Factory behind the pool.
    pub factory: Arc<MockConnectionFactory>,
    /// Events emitted by the pool.
    pub events: Arc<EventRecorder>,
}

impl PoolFixture {
    /// Build and initialize a pool with `settings` and a default mock factory.
    pub fn new(settings: ConnectionPoolSettings) -> Result<Self> {
        Self::with_factory(settings, MockConnectionFactory::new())
    }

    /// Build and initialize a pool with `settings` and `factory`.
    pub fn with_factory(
        settings: ConnectionPoolSettings,
        factory: Arc<MockConnectionFactory>,
    ) -> Result<Self> {
        let events = EventRecorder::new();
        let connections = Arc::clone(&factory) as Arc<dyn ConnectionFactory>;
        let pool = ConnectionPool::builder(server_id(), connections)
            .settings(settings)
            .listener(Arc::clone(&events) as Arc<dyn PoolEventListener>)
            .build()?;
        pool.initialize()?;
        Ok(Self {
            pool,
            factory,
            events,
        })
    }
}

impl std::fmt::Debug for PoolFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolFixture")
            .field("pool", &self.pool)
            .field("created", &self.factory.created_count())
            .finish()
    }
}
