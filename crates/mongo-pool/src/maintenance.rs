//! Background pruning and minimum-size warm-up.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;
use crate::pool::PoolInner;
use crate::semaphore::EnterError;

/// Bound on how long one maintenance step waits for a capacity slot.
pub(crate) const MAINTENANCE_SLOT_WAIT: Duration = Duration::from_millis(20);

/// Owner of the background maintenance task.
///
/// The task holds only a weak reference to the pool and upgrades it once
/// per tick, so it never keeps a dropped pool alive.
#[derive(Debug, Default)]
pub(crate) struct MaintenanceLoop {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceLoop {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn the loop on the current Tokio runtime. Only the first call
    /// spawns.
    pub(crate) fn start(&self, pool: Weak<PoolInner>, interval: Duration) {
        let mut task = self.task.lock();
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(run(pool, interval, cancel)));
    }

    /// Signal the loop to exit. Does not wait for it; the task observes
    /// the token at its next await.
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

async fn run(pool: Weak<PoolInner>, interval: Duration, cancel: CancellationToken) {
    tracing::debug!(?interval, "maintenance loop started");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(inner) = pool.upgrade() else {
            break;
        };
        if !inner.state.get().is_open() {
            break;
        }

        if let Err(err) = tick(&inner, &cancel).await {
            match err {
                PoolError::Cancelled | PoolError::Disposed => {}
                err => {
                    inner.counters.maintenance_failed();
                    tracing::warn!(server = %inner.server_id, error = %err, "maintenance tick failed");
                }
            }
        }
        drop(inner);

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!("maintenance loop stopped");
}

/// One maintenance pass: prune expired idle connections, then top the
/// pool up to `min_connections`.
pub(crate) async fn tick(inner: &PoolInner, cancel: &CancellationToken) -> Result<(), PoolError> {
    prune(inner, cancel).await?;
    ensure_min_size(inner, cancel).await
}

async fn prune(inner: &PoolInner, cancel: &CancellationToken) -> Result<(), PoolError> {
    let _slot = match inner
        .pool_capacity_semaphore
        .enter(MAINTENANCE_SLOT_WAIT, cancel)
        .await
    {
        Ok(slot) => slot,
        // pool saturated; nothing idle worth pruning
        Err(EnterError::Timeout) => return Ok(()),
        Err(err) => return Err(slot_error(err)),
    };

    let removed = inner.holder.prune();
    if removed > 0 {
        tracing::debug!(server = %inner.server_id, removed, "pruned expired connections");
    }
    Ok(())
}

async fn ensure_min_size(inner: &PoolInner, cancel: &CancellationToken) -> Result<(), PoolError> {
    let min_connections = inner.settings.min_connections();
    while inner.created_count() < min_connections {
        let slot = match inner
            .pool_capacity_semaphore
            .enter(MAINTENANCE_SLOT_WAIT, cancel)
            .await
        {
            Ok(slot) => slot,
            Err(EnterError::Timeout) => return Ok(()),
            Err(err) => return Err(slot_error(err)),
        };

        let connection = inner
            .open_new_connection(inner.settings.connect_timeout(), cancel, Instant::now())
            .await?;
        tracing::trace!(connection_id = %connection.connection_id(), "warmed up connection");
        // returned before the slot so created_count never dips
        inner.holder.return_connection(connection);
        // dispose may have drained the holder while the open completed
        if inner.state.get().is_disposed() {
            inner.holder.clear();
            return Err(PoolError::Disposed);
        }
        drop(slot);
    }
    Ok(())
}

fn slot_error(err: EnterError) -> PoolError {
    match err {
        EnterError::Cancelled => PoolError::Cancelled,
        EnterError::Closed => PoolError::Disposed,
        EnterError::Timeout => PoolError::AcquireTimeout {
            elapsed: MAINTENANCE_SLOT_WAIT,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::ConnectionPoolSettings;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::connection::ConnectionFactory;
    use crate::events::PoolEvent;
    use crate::pool::ConnectionPool;
    use crate::test_support::{StubFactory, init_tracing, server_id};

    fn pool(settings: ConnectionPoolSettings) -> (ConnectionPool, Arc<StubFactory>) {
        init_tracing();
        let factory = Arc::new(StubFactory::default());
        let pool = ConnectionPool::new(
            server_id(),
            settings,
            Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
        )
        .unwrap();
        (pool, factory)
    }

    #[tokio::test]
    async fn test_loop_warms_up_to_min_connections() {
        let (pool, factory) = pool(
            ConnectionPoolSettings::new()
                .with_min_connections(3)
                .with_maintenance_interval(Duration::from_millis(10)),
        );
        pool.initialize().unwrap();

        for _ in 0..100 {
            if pool.dormant_count() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.dormant_count(), 3);
        assert_eq!(pool.created_count(), 3);
        assert_eq!(factory.created(), 3);
    }

    #[tokio::test]
    async fn test_loop_prunes_expired_idle_connections() {
        let (pool, factory) = pool(
            ConnectionPoolSettings::new().with_maintenance_interval(Duration::from_millis(10)),
        );
        pool.initialize().unwrap();
        drop(pool.acquire().await.unwrap());
        assert_eq!(pool.dormant_count(), 1);

        factory.probe(0).unwrap().expire();
        for _ in 0..100 {
            if pool.dormant_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.dormant_count(), 0);
        assert_eq!(factory.probe(0).unwrap().dispose_calls(), 1);
    }

    #[tokio::test]
    async fn test_tick_records_failed_warm_up() {
        let (pool, factory) = pool(
            ConnectionPoolSettings::new()
                .with_min_connections(1)
                .without_maintenance(),
        );
        pool.initialize().unwrap();
        factory.fail_opens(true);

        let cancel = CancellationToken::new();
        let result = tick(&pool.inner_for_tests(), &cancel).await;
        assert!(matches!(result, Err(PoolError::Connection(_))));
        assert_eq!(pool.created_count(), 0);
        assert_eq!(pool.available_count(), 10);
        assert_eq!(factory.probe(0).unwrap().dispose_calls(), 1);
    }

    #[tokio::test]
    async fn test_tick_skips_when_pool_saturated() {
        let (pool, factory) = pool(
            ConnectionPoolSettings::new()
                .with_max_connections(1)
                .with_min_connections(1)
                .without_maintenance(),
        );
        pool.initialize().unwrap();
        let _held = pool.acquire().await.unwrap();

        let cancel = CancellationToken::new();
        tick(&pool.inner_for_tests(), &cancel).await.unwrap();
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_dispose_stops_loop() {
        let (pool, _) = pool(
            ConnectionPoolSettings::new().with_maintenance_interval(Duration::from_millis(10)),
        );
        pool.initialize().unwrap();
        let inner = pool.inner_for_tests();
        assert!(inner.maintenance_for_tests().is_running());

        pool.dispose();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!inner.maintenance_for_tests().is_running());
    }

    #[tokio::test]
    async fn test_disabled_maintenance_spawns_nothing() {
        let (pool, factory) = pool(
            ConnectionPoolSettings::new()
                .with_min_connections(2)
                .without_maintenance(),
        );
        pool.initialize().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pool.inner_for_tests().maintenance_for_tests().is_running());
        assert_eq!(factory.created(), 0);
    }

    async fn wait_for_first_open(factory: &StubFactory) {
        for _ in 0..100 {
            if factory.probe(0).is_some_and(|probe| probe.open_calls() == 1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(factory.probe(0).unwrap().open_calls(), 1);
    }

    #[tokio::test]
    async fn test_dropping_pool_during_slow_warm_up_closes_promptly() {
        init_tracing();
        let factory = Arc::new(StubFactory::default());
        factory.delay_opens(Duration::from_secs(5));
        let closed = Arc::new(AtomicBool::new(false));
        let closed_seen = Arc::clone(&closed);
        let pool = ConnectionPool::builder(
            server_id(),
            Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
        )
        .settings(
            ConnectionPoolSettings::new()
                .with_min_connections(1)
                .with_maintenance_interval(Duration::from_millis(10)),
        )
        .listener(Arc::new(move |event: &PoolEvent| {
            if matches!(event, PoolEvent::Closed { .. }) {
                closed_seen.store(true, Ordering::SeqCst);
            }
        }))
        .build()
        .unwrap();
        pool.initialize().unwrap();
        wait_for_first_open(&factory).await;

        let started = Instant::now();
        drop(pool);
        assert!(closed.load(Ordering::SeqCst));

        for _ in 0..100 {
            if factory.probe(0).unwrap().dispose_calls() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(factory.probe(0).unwrap().dispose_calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_warm_up_finishing_after_dispose_leaves_nothing_idle() {
        let (pool, factory) = pool(
            ConnectionPoolSettings::new()
                .with_min_connections(1)
                .without_maintenance(),
        );
        pool.initialize().unwrap();
        factory.delay_opens(Duration::from_millis(50));

        // a token dispose does not cancel, so the open runs to completion
        let inner = Arc::clone(pool.inner_for_tests());
        let warm_up = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            tick(&inner, &cancel).await
        });
        wait_for_first_open(&factory).await;
        pool.dispose();

        let result = warm_up.await.unwrap();
        assert!(matches!(result, Err(PoolError::Disposed)));
        assert_eq!(pool.dormant_count(), 0);
        assert_eq!(factory.probe(0).unwrap().dispose_calls(), 1);
    }
}
