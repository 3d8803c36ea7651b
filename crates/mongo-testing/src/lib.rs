//! # mongo-testing
//!
//! Test infrastructure for the MongoDB connection pool.
//!
//! This crate provides a mock connection factory and fixtures so the pool
//! can be exercised end to end without a server.
//!
//! ## Features
//!
//! - Echoing mock connections with open delays and failure injection
//! - Per-connection probes for expiration and disposal checks
//! - An event recorder implementing `PoolEventListener`
//! - A pool fixture bundling pool, factory and recorder
//!
//! ## Example
//!
//! ```rust,ignore
//! use mongo_testing::{PoolFixture, test_settings};
//!
//! #[tokio::test]
//! async fn test_with_mock_pool() {
//!     let fixture = PoolFixture::new(test_settings(2)).unwrap();
//!     let handle = fixture.pool.acquire().await.unwrap();
//!     assert_eq!(fixture.factory.created_count(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_connection;

pub use fixtures::{EventRecorder, PoolFixture, server_id, server_id_on, test_settings};
pub use mock_connection::{
    MockConfig, MockConnection, MockConnectionFactory, MockFactoryBuilder, MockProbe,
};
