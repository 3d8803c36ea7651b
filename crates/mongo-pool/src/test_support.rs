//! In-crate stubs for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::connection::{
    ClusterId, ConnectionFactory, ConnectionId, EndPoint, RawConnection, RequestMessage,
    ResponseMessage, ServerId,
};
use crate::error::ConnectionError;

/// Route pool logs to the test harness; safe to call from every test.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn server_id() -> ServerId {
    ServerId::new(ClusterId(1), EndPoint::new("localhost", 27017))
}

#[derive(Debug, Default)]
struct StubState {
    expired: AtomicBool,
    fail_open: AtomicBool,
    open_delay_ms: AtomicU64,
    opens: AtomicUsize,
    disposes: AtomicUsize,
}

/// Observes a [`StubConnection`] after it was boxed into the pool.
#[derive(Debug, Clone)]
pub(crate) struct StubProbe(Arc<StubState>);

impl StubProbe {
    pub(crate) fn expire(&self) {
        self.0.expired.store(true, Ordering::SeqCst);
    }

    pub(crate) fn dispose_calls(&self) -> usize {
        self.0.disposes.load(Ordering::SeqCst)
    }

    pub(crate) fn open_calls(&self) -> usize {
        self.0.opens.load(Ordering::SeqCst)
    }
}

pub(crate) struct StubConnection {
    id: ConnectionId,
    state: Arc<StubState>,
}

impl StubConnection {
    pub(crate) fn new(local_value: u64) -> (Self, StubProbe) {
        let state = Arc::new(StubState::default());
        let conn = Self {
            id: ConnectionId::new(server_id(), local_value),
            state: Arc::clone(&state),
        };
        (conn, StubProbe(state))
    }
}

#[async_trait::async_trait]
impl RawConnection for StubConnection {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    async fn open(
        &self,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let delay = Duration::from_millis(self.state.open_delay_ms.load(Ordering::SeqCst));
        if !delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(ConnectionError::Closed),
                () = tokio::time::sleep(delay) => {}
            }
        }
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(ConnectionError::Open {
                endpoint: self.id.server_id().endpoint().clone(),
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn send_messages(
        &self,
        _messages: Vec<RequestMessage>,
        _cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn receive_message(
        &self,
        response_to: i32,
        _cancel: &CancellationToken,
    ) -> Result<ResponseMessage, ConnectionError> {
        Ok(ResponseMessage::new(response_to, &b"ok"[..]))
    }

    fn is_expired(&self) -> bool {
        self.state.expired.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.state.disposes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`StubConnection`]s and remembering their probes.
#[derive(Default)]
pub(crate) struct StubFactory {
    next_id: AtomicU64,
    fail_open: AtomicBool,
    open_delay_ms: AtomicU64,
    probes: parking_lot::Mutex<Vec<StubProbe>>,
}

impl StubFactory {
    pub(crate) fn fail_opens(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn delay_opens(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.open_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub(crate) fn created(&self) -> usize {
        self.probes.lock().len()
    }

    pub(crate) fn probe(&self, index: usize) -> Option<StubProbe> {
        self.probes.lock().get(index).cloned()
    }
}

impl ConnectionFactory for StubFactory {
    fn create_connection(
        &self,
        _server_id: &ServerId,
        _endpoint: &EndPoint,
    ) -> Box<dyn RawConnection> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (conn, probe) = StubConnection::new(id);
        conn.state
            .fail_open
            .store(self.fail_open.load(Ordering::SeqCst), Ordering::SeqCst);
        conn.state
            .open_delay_ms
            .store(self.open_delay_ms.load(Ordering::SeqCst), Ordering::SeqCst);
        self.probes.lock().push(probe);
        Box::new(conn)
    }
}
