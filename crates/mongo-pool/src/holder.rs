//! Idle connection storage.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::events::{EventSink, PoolEvent};
use crate::metrics::PoolCounters;
use crate::pooled::PooledConnection;

/// LIFO stack of idle connections.
///
/// The most recently returned connection is handed out first so warm
/// connections keep getting reused and cold ones age out.
#[derive(Debug)]
pub(crate) struct ConnectionHolder {
    connections: Mutex<Vec<Arc<PooledConnection>>>,
    events: EventSink,
    counters: Arc<PoolCounters>,
}

impl ConnectionHolder {
    pub(crate) fn new(events: EventSink, counters: Arc<PoolCounters>) -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            events,
            counters,
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Pop the most recent idle connection.
    ///
    /// An expired top entry is discarded and `None` is returned; the caller
    /// then creates a fresh connection instead of scanning deeper.
    pub(crate) fn acquire(&self) -> Option<Arc<PooledConnection>> {
        let connection = self.connections.lock().pop()?;
        if connection.is_expired() {
            self.discard(&connection);
            return None;
        }
        Some(connection)
    }

    /// Put a connection back, or discard it if it expired while out.
    pub(crate) fn return_connection(&self, connection: Arc<PooledConnection>) {
        if connection.is_expired() {
            self.discard(&connection);
            return;
        }
        self.connections.lock().push(connection);
    }

    /// Discard every expired idle connection; returns how many were removed.
    pub(crate) fn prune(&self) -> usize {
        let expired: Vec<_> = {
            let mut connections = self.connections.lock();
            let (expired, live): (Vec<_>, Vec<_>) =
                connections.drain(..).partition(|c| c.is_expired());
            *connections = live;
            expired
        };
        for connection in &expired {
            self.discard(connection);
        }
        expired.len()
    }

    /// Discard every idle connection.
    pub(crate) fn clear(&self) {
        let drained = std::mem::take(&mut *self.connections.lock());
        for connection in &drained {
            self.discard(connection);
        }
    }

    /// Dispose a connection that will never be pooled again.
    pub(crate) fn discard(&self, connection: &PooledConnection) {
        if connection.is_disposed() {
            return;
        }
        self.events.emit(|| PoolEvent::Removing {
            connection_id: connection.connection_id().clone(),
        });
        let started = Instant::now();
        if connection.dispose() {
            self.counters.connection_closed();
        }
        tracing::debug!(
            connection_id = %connection.connection_id(),
            generation = connection.generation(),
            "removed connection from pool"
        );
        self.events.emit(|| PoolEvent::Removed {
            connection_id: connection.connection_id().clone(),
            duration: started.elapsed(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pooled::{ExpirationPolicy, Generation};
    use crate::test_support::{StubConnection, StubProbe};
    use std::time::Duration;

    fn holder() -> (ConnectionHolder, Arc<PoolCounters>) {
        let counters = Arc::new(PoolCounters::default());
        (
            ConnectionHolder::new(EventSink::default(), Arc::clone(&counters)),
            counters,
        )
    }

    fn pooled(id: u64, generation: &Arc<Generation>) -> (Arc<PooledConnection>, StubProbe) {
        let (raw, probe) = StubConnection::new(id);
        let conn = PooledConnection::new(
            Box::new(raw),
            Arc::clone(generation),
            ExpirationPolicy {
                max_idle_time: Duration::from_secs(60),
                max_life_time: Duration::from_secs(600),
            },
        );
        (Arc::new(conn), probe)
    }

    #[test]
    fn test_acquire_is_lifo() {
        let (holder, _) = holder();
        let generation = Arc::new(Generation::default());
        let (first, _) = pooled(1, &generation);
        let (second, _) = pooled(2, &generation);
        holder.return_connection(first);
        holder.return_connection(second);

        let top = holder.acquire().map(|c| c.connection_id().local_value());
        assert_eq!(top, Some(2));
        assert_eq!(holder.count(), 1);
    }

    #[test]
    fn test_acquire_expired_top_returns_none_without_scanning() {
        let (holder, counters) = holder();
        let generation = Arc::new(Generation::default());
        let (healthy, _) = pooled(1, &generation);
        let (broken, broken_probe) = pooled(2, &generation);
        holder.return_connection(healthy);
        holder.return_connection(broken);
        broken_probe.expire();

        assert!(holder.acquire().is_none());
        assert_eq!(broken_probe.dispose_calls(), 1);
        assert_eq!(holder.count(), 1);
        assert_eq!(counters.snapshot().connections_closed, 1);
    }

    #[test]
    fn test_acquire_empty() {
        let (holder, _) = holder();
        assert!(holder.acquire().is_none());
    }

    #[test]
    fn test_return_expired_disposes() {
        let (holder, _) = holder();
        let generation = Arc::new(Generation::default());
        let (conn, probe) = pooled(1, &generation);
        generation.increment();

        holder.return_connection(conn);
        assert_eq!(holder.count(), 0);
        assert_eq!(probe.dispose_calls(), 1);
    }

    #[test]
    fn test_prune_removes_every_expired_entry() {
        let (holder, _) = holder();
        let generation = Arc::new(Generation::default());
        let mut probes = Vec::new();
        for id in 1..=4 {
            let (conn, probe) = pooled(id, &generation);
            holder.return_connection(conn);
            probes.push(probe);
        }
        probes[0].expire();
        probes[2].expire();

        assert_eq!(holder.prune(), 2);
        assert_eq!(holder.count(), 2);
        assert_eq!(probes[0].dispose_calls(), 1);
        assert_eq!(probes[1].dispose_calls(), 0);
        assert_eq!(probes[2].dispose_calls(), 1);
        assert_eq!(probes[3].dispose_calls(), 0);
    }

    #[test]
    fn test_prune_preserves_lifo_order() {
        let (holder, _) = holder();
        let generation = Arc::new(Generation::default());
        let (a, _) = pooled(1, &generation);
        let (b, b_probe) = pooled(2, &generation);
        let (c, _) = pooled(3, &generation);
        holder.return_connection(a);
        holder.return_connection(b);
        holder.return_connection(c);
        b_probe.expire();

        holder.prune();
        let order: Vec<_> = std::iter::from_fn(|| holder.acquire())
            .map(|c| c.connection_id().local_value())
            .collect();
        assert_eq!(order, vec![3, 1]);
    }

    #[test]
    fn test_clear_disposes_all() {
        let (holder, counters) = holder();
        let generation = Arc::new(Generation::default());
        let (a, a_probe) = pooled(1, &generation);
        let (b, b_probe) = pooled(2, &generation);
        holder.return_connection(a);
        holder.return_connection(b);

        holder.clear();
        assert_eq!(holder.count(), 0);
        assert_eq!(a_probe.dispose_calls(), 1);
        assert_eq!(b_probe.dispose_calls(), 1);
        assert_eq!(counters.snapshot().connections_closed, 2);
    }

    #[test]
    fn test_discard_twice_counts_once() {
        let (holder, counters) = holder();
        let generation = Arc::new(Generation::default());
        let (conn, probe) = pooled(1, &generation);
        holder.discard(&conn);
        holder.discard(&conn);
        assert_eq!(probe.dispose_calls(), 1);
        assert_eq!(counters.snapshot().connections_closed, 1);
    }
}
