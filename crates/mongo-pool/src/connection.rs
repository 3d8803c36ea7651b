//! Raw connection collaborator interfaces.
//!
//! The pool never speaks the wire protocol itself. It drives connections
//! through the [`RawConnection`] trait and obtains new ones from a
//! [`ConnectionFactory`]. Both are object-safe so a driver can plug in its
//! own socket, TLS and handshake stack.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;

/// Identifier of the cluster a server belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network address of a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndPoint {
    host: Arc<str>,
    port: u16,
}

impl EndPoint {
    /// Create an endpoint from a host name and port.
    pub fn new(host: impl Into<Arc<str>>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identity of one server within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerId {
    cluster_id: ClusterId,
    endpoint: EndPoint,
}

impl ServerId {
    /// Create a server identity.
    #[must_use]
    pub fn new(cluster_id: ClusterId, endpoint: EndPoint) -> Self {
        Self {
            cluster_id,
            endpoint,
        }
    }

    /// Cluster the server belongs to.
    #[must_use]
    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    /// Server endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &EndPoint {
        &self.endpoint
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ cluster: {}, endpoint: {} }}", self.cluster_id, self.endpoint)
    }
}

/// Identity of one physical connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    server_id: ServerId,
    local_value: u64,
}

impl ConnectionId {
    /// Create a connection identity with a driver-local sequence number.
    #[must_use]
    pub fn new(server_id: ServerId, local_value: u64) -> Self {
        Self {
            server_id,
            local_value,
        }
    }

    /// Server the connection targets.
    #[must_use]
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Driver-local sequence number.
    #[must_use]
    pub fn local_value(&self) -> u64 {
        self.local_value
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_value, self.server_id.endpoint)
    }
}

/// An encoded request ready for the wire.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    /// Request id used to correlate the reply.
    pub request_id: i32,
    /// Encoded message body.
    pub payload: Bytes,
}

impl RequestMessage {
    /// Create a request message.
    pub fn new(request_id: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            payload: payload.into(),
        }
    }
}

/// An encoded reply read from the wire.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    /// Request id this message answers.
    pub response_to: i32,
    /// Encoded message body.
    pub payload: Bytes,
}

impl ResponseMessage {
    /// Create a response message.
    pub fn new(response_to: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            response_to,
            payload: payload.into(),
        }
    }
}

/// One physical connection to a server, owned by the wire-protocol layer.
///
/// A pooled connection may be shared by several forked handles, so every
/// method takes `&self`. Implementations synchronize their socket access
/// internally.
#[async_trait::async_trait]
pub trait RawConnection: Send + Sync {
    /// Identity of this connection.
    fn connection_id(&self) -> &ConnectionId;

    /// Connect and run the handshake.
    ///
    /// Implementations should give up once `timeout` elapses or `cancel`
    /// fires; the pool also enforces both around this call.
    async fn open(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError>;

    /// Write a batch of requests.
    async fn send_messages(
        &self,
        messages: Vec<RequestMessage>,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError>;

    /// Read the reply to `response_to`.
    async fn receive_message(
        &self,
        response_to: i32,
        cancel: &CancellationToken,
    ) -> Result<ResponseMessage, ConnectionError>;

    /// Whether the socket layer considers this connection unusable.
    fn is_expired(&self) -> bool;

    /// Close the socket. Must be idempotent and must not block.
    fn dispose(&self);
}

/// Creates unopened raw connections for a server.
pub trait ConnectionFactory: Send + Sync {
    /// Create a new, unopened connection.
    fn create_connection(&self, server_id: &ServerId, endpoint: &EndPoint)
    -> Box<dyn RawConnection>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let endpoint = EndPoint::new("localhost", 27017);
        assert_eq!(endpoint.to_string(), "localhost:27017");
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.port(), 27017);
    }

    #[test]
    fn test_connection_id_display() {
        let server = ServerId::new(ClusterId(1), EndPoint::new("db", 27018));
        let id = ConnectionId::new(server.clone(), 7);
        assert_eq!(id.to_string(), "7@db:27018");
        assert_eq!(id.server_id(), &server);
    }

    #[test]
    fn test_traits_are_object_safe() {
        fn assert_object_safe(_: Option<&dyn RawConnection>, _: Option<&dyn ConnectionFactory>) {}
        assert_object_safe(None, None);
    }
}
