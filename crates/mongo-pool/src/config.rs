//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default maximum number of connections.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default number of callers allowed to wait for a connection at once.
pub const DEFAULT_WAIT_QUEUE_SIZE: u32 = 5 * DEFAULT_MAX_CONNECTIONS;

/// Settings for one connection pool.
///
/// The value is immutable once built. Every `with_*` method returns a new
/// value and leaves the receiver untouched, so a settings value can be
/// shared freely between pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPoolSettings {
    max_connections: u32,
    min_connections: u32,
    max_idle_time: Duration,
    max_life_time: Duration,
    maintenance_interval: Option<Duration>,
    wait_queue_size: u32,
    wait_queue_timeout: Duration,
    connect_timeout: Duration,
}

impl Default for ConnectionPoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 0,
            max_idle_time: Duration::from_secs(600),
            max_life_time: Duration::from_secs(1800),
            maintenance_interval: Some(Duration::from_secs(60)),
            wait_queue_size: DEFAULT_WAIT_QUEUE_SIZE,
            wait_queue_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionPoolSettings {
    /// Create settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of connections checked out at once.
    #[must_use]
    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    /// Number of connections the maintenance loop keeps open.
    #[must_use]
    pub fn min_connections(&self) -> u32 {
        self.min_connections
    }

    /// Time a connection may sit unused before it expires.
    #[must_use]
    pub fn max_idle_time(&self) -> Duration {
        self.max_idle_time
    }

    /// Time since creation after which a connection expires.
    #[must_use]
    pub fn max_life_time(&self) -> Duration {
        self.max_life_time
    }

    /// Period of the maintenance loop, or `None` if maintenance is disabled.
    #[must_use]
    pub fn maintenance_interval(&self) -> Option<Duration> {
        self.maintenance_interval
    }

    /// Maximum number of callers waiting for a connection at once.
    #[must_use]
    pub fn wait_queue_size(&self) -> u32 {
        self.wait_queue_size
    }

    /// Deadline used by [`ConnectionPool::acquire`](crate::ConnectionPool::acquire).
    #[must_use]
    pub fn wait_queue_timeout(&self) -> Duration {
        self.wait_queue_timeout
    }

    /// Open deadline for connections created by the maintenance loop.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Return a copy with a different maximum pool size.
    #[must_use]
    pub fn with_max_connections(&self, count: u32) -> Self {
        Self {
            max_connections: count,
            ..self.clone()
        }
    }

    /// Return a copy with a different minimum pool size.
    #[must_use]
    pub fn with_min_connections(&self, count: u32) -> Self {
        Self {
            min_connections: count,
            ..self.clone()
        }
    }

    /// Return a copy with a different idle expiration.
    #[must_use]
    pub fn with_max_idle_time(&self, idle: Duration) -> Self {
        Self {
            max_idle_time: idle,
            ..self.clone()
        }
    }

    /// Return a copy with a different lifetime expiration.
    #[must_use]
    pub fn with_max_life_time(&self, lifetime: Duration) -> Self {
        Self {
            max_life_time: lifetime,
            ..self.clone()
        }
    }

    /// Return a copy with a different maintenance period.
    #[must_use]
    pub fn with_maintenance_interval(&self, interval: Duration) -> Self {
        Self {
            maintenance_interval: Some(interval),
            ..self.clone()
        }
    }

    /// Return a copy with the maintenance loop disabled.
    #[must_use]
    pub fn without_maintenance(&self) -> Self {
        Self {
            maintenance_interval: None,
            ..self.clone()
        }
    }

    /// Return a copy with a different waiter admission limit.
    #[must_use]
    pub fn with_wait_queue_size(&self, size: u32) -> Self {
        Self {
            wait_queue_size: size,
            ..self.clone()
        }
    }

    /// Return a copy with a different default acquisition deadline.
    #[must_use]
    pub fn with_wait_queue_timeout(&self, timeout: Duration) -> Self {
        Self {
            wait_queue_timeout: timeout,
            ..self.clone()
        }
    }

    /// Return a copy with a different maintenance open deadline.
    #[must_use]
    pub fn with_connect_timeout(&self, timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout,
            ..self.clone()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        if self.wait_queue_size == 0 {
            return Err(PoolError::Configuration(
                "wait_queue_size must be greater than 0".into(),
            ));
        }
        if self.maintenance_interval == Some(Duration::ZERO) {
            return Err(PoolError::Configuration(
                "maintenance_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
