//! Pool counters and status snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the pool gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Free capacity slots.
    pub available: u32,
    /// Capacity slots currently taken.
    pub in_use: u32,
    /// Connections idle in the pool.
    pub idle: u32,
    /// `in_use + idle`.
    pub created: u32,
    /// Maximum allowed connections.
    pub max: u32,
    /// Current generation.
    pub generation: u64,
}

impl PoolStatus {
    /// Percentage of capacity in use.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max) * 100.0
    }
}

/// Monotonic counters since the pool was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Connections created and opened.
    pub connections_created: u64,
    /// Connections disposed.
    pub connections_closed: u64,
    /// Acquisitions that returned a handle.
    pub checkouts_successful: u64,
    /// Acquisitions that failed for any reason.
    pub checkouts_failed: u64,
    /// Acquisitions rejected by waiter admission.
    pub wait_queue_rejections: u64,
    /// Acquisitions that hit their deadline.
    pub acquire_timeouts: u64,
    /// Acquisitions cancelled by the caller.
    pub acquire_cancellations: u64,
    /// Maintenance ticks that ended in an error.
    pub maintenance_failures: u64,
}

impl PoolMetrics {
    /// Fraction of acquisitions that succeeded; `1.0` before any attempt.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
    wait_queue_rejections: AtomicU64,
    acquire_timeouts: AtomicU64,
    acquire_cancellations: AtomicU64,
    maintenance_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PoolCounters {
    pub(crate) fn connection_created(&self) {
        bump(&self.connections_created);
    }

    pub(crate) fn connection_closed(&self) {
        bump(&self.connections_closed);
    }

    pub(crate) fn checkout_succeeded(&self) {
        bump(&self.checkouts_successful);
    }

    pub(crate) fn wait_queue_rejected(&self) {
        bump(&self.wait_queue_rejections);
        bump(&self.checkouts_failed);
    }

    pub(crate) fn acquire_timed_out(&self) {
        bump(&self.acquire_timeouts);
        bump(&self.checkouts_failed);
    }

    pub(crate) fn acquire_cancelled(&self) {
        bump(&self.acquire_cancellations);
        bump(&self.checkouts_failed);
    }

    pub(crate) fn checkout_failed(&self) {
        bump(&self.checkouts_failed);
    }

    pub(crate) fn maintenance_failed(&self) {
        bump(&self.maintenance_failures);
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            checkouts_successful: self.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: self.checkouts_failed.load(Ordering::Relaxed),
            wait_queue_rejections: self.wait_queue_rejections.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            acquire_cancellations: self.acquire_cancellations.load(Ordering::Relaxed),
            maintenance_failures: self.maintenance_failures.load(Ordering::Relaxed),
        }
    }
}
