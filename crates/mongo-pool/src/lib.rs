//! # mongo-driver-pool
//!
//! Exclusive connection pool for a single MongoDB server.
//!
//! Each checked-out connection is owned by one logical operation at a
//! time, and may be shared across sub-operations with
//! [`ConnectionHandle::fork`]. The pool enforces two limits:
//!
//! - at most `max_connections` connections are checked out at once
//! - at most `wait_queue_size` callers wait for a connection at once;
//!   further callers fail fast with [`PoolError::WaitQueueFull`]
//!
//! ## Features
//!
//! - LIFO reuse of idle connections
//! - Idle-time and lifetime expiration
//! - O(1) invalidation of every connection with [`ConnectionPool::clear`]
//! - Background pruning and warm-up to `min_connections`
//! - Lifecycle events through [`PoolEventListener`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use mongo_driver_pool::{ConnectionPool, ConnectionPoolSettings};
//!
//! let settings = ConnectionPoolSettings::new()
//!     .with_min_connections(2)
//!     .with_max_connections(20);
//!
//! let pool = ConnectionPool::new(server_id, settings, factory)?;
//! pool.initialize()?;
//!
//! let handle = pool.acquire().await?;
//! // Use connection...
//! // Connection automatically returned to pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod handle;
mod holder;
pub mod lifecycle;
mod maintenance;
pub mod metrics;
pub mod pool;
mod pooled;
mod semaphore;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ConnectionPoolSettings;
pub use connection::{
    ClusterId, ConnectionFactory, ConnectionId, EndPoint, RawConnection, RequestMessage,
    ResponseMessage, ServerId,
};
pub use error::{ConnectionError, PoolError, Result};
pub use events::{CheckOutFailure, PoolEvent, PoolEventListener};
pub use handle::ConnectionHandle;
pub use lifecycle::{HandleState, PoolState};
pub use metrics::{PoolMetrics, PoolStatus};
pub use pool::{ConnectionPool, ConnectionPoolBuilder};

pub use tokio_util::sync::CancellationToken;
