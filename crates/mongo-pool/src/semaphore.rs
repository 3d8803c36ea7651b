//! Counting semaphores used for admission control.
//!
//! The pool uses two independent instances:
//!
//! - `pool_capacity_semaphore` bounds connections checked out at once
//!   (`max_connections` slots). A slot is held for the whole life of a
//!   checkout and returned by the pool on checkin.
//! - `waiter_admission_semaphore` bounds callers inside
//!   `acquire_connection` at once (`wait_queue_size` slots). It is only
//!   ever entered with zero wait, so overload fails fast.

use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio_util::sync::CancellationToken;

/// Why a bounded wait on a [`SlotSemaphore`] gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnterError {
    Timeout,
    Cancelled,
    Closed,
}

#[derive(Debug)]
pub(crate) struct SlotSemaphore {
    name: &'static str,
    semaphore: Semaphore,
    capacity: usize,
}

/// A taken slot; dropping it gives the slot back.
#[derive(Debug)]
#[must_use]
pub(crate) struct Slot<'a>(SemaphorePermit<'a>);

impl Slot<'_> {
    /// Keep the slot taken past this guard; the owner must later call
    /// [`SlotSemaphore::release`].
    pub(crate) fn detach(self) {
        self.0.forget();
    }
}

impl SlotSemaphore {
    pub(crate) fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            semaphore: Semaphore::new(capacity),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Take a slot without waiting.
    pub(crate) fn try_enter(&self) -> Result<Slot<'_>, EnterError> {
        match self.semaphore.try_acquire() {
            Ok(permit) => Ok(Slot(permit)),
            Err(TryAcquireError::NoPermits) => Err(EnterError::Timeout),
            Err(TryAcquireError::Closed) => Err(EnterError::Closed),
        }
    }

    /// Wait up to `timeout` for a slot, giving up early on cancellation.
    ///
    /// A free slot is taken even when `timeout` is zero.
    pub(crate) async fn enter(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Slot<'_>, EnterError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EnterError::Cancelled),
            acquired = tokio::time::timeout(timeout, self.semaphore.acquire()) => match acquired {
                Ok(Ok(permit)) => Ok(Slot(permit)),
                Ok(Err(_)) => Err(EnterError::Closed),
                Err(_) => Err(EnterError::Timeout),
            },
        }
    }

    /// Give back a slot previously kept with [`Slot::detach`].
    pub(crate) fn release(&self) {
        if self.available() >= self.capacity() {
            tracing::warn!(semaphore = self.name, "release without a matching detached slot");
            return;
        }
        self.semaphore.add_permits(1);
    }

    /// Wake every waiter with [`EnterError::Closed`] and refuse new entries.
    pub(crate) fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_try_enter_until_full() {
        let semaphore = SlotSemaphore::new("test", 2);
        let first = semaphore.try_enter().unwrap();
        let _second = semaphore.try_enter().unwrap();
        assert_eq!(semaphore.available(), 0);
        assert_eq!(semaphore.try_enter().unwrap_err(), EnterError::Timeout);

        drop(first);
        assert_eq!(semaphore.available(), 1);
    }

    #[test]
    fn test_detach_and_release() {
        let semaphore = SlotSemaphore::new("test", 1);
        semaphore.try_enter().unwrap().detach();
        assert_eq!(semaphore.available(), 0);

        semaphore.release();
        assert_eq!(semaphore.available(), 1);
    }

    #[test]
    fn test_release_never_exceeds_capacity() {
        let semaphore = SlotSemaphore::new("test", 1);
        semaphore.release();
        assert_eq!(semaphore.available(), 1);
        assert_eq!(semaphore.capacity(), 1);
    }

    #[tokio::test]
    async fn test_enter_with_zero_timeout_takes_free_slot() {
        let semaphore = SlotSemaphore::new("test", 1);
        let cancel = CancellationToken::new();
        let slot = tokio_test::assert_ok!(semaphore.enter(Duration::ZERO, &cancel).await);
        slot.detach();
        assert_eq!(semaphore.available(), 0);
    }

    #[tokio::test]
    async fn test_enter_times_out() {
        let semaphore = SlotSemaphore::new("test", 1);
        let cancel = CancellationToken::new();
        let _held = semaphore.try_enter().unwrap();

        let started = Instant::now();
        let result = semaphore.enter(Duration::from_millis(30), &cancel).await;
        assert_eq!(result.unwrap_err(), EnterError::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_enter_observes_cancellation() {
        let semaphore = SlotSemaphore::new("test", 1);
        let cancel = CancellationToken::new();
        let _held = semaphore.try_enter().unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = semaphore.enter(Duration::from_secs(10), &cancel).await;
        assert_eq!(result.unwrap_err(), EnterError::Cancelled);
    }

    #[tokio::test]
    async fn test_enter_wakes_when_slot_released() {
        let semaphore = std::sync::Arc::new(SlotSemaphore::new("test", 1));
        semaphore.try_enter().unwrap().detach();

        let releaser = std::sync::Arc::clone(&semaphore);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            releaser.release();
        });

        let cancel = CancellationToken::new();
        let _slot = tokio_test::assert_ok!(semaphore.enter(Duration::from_secs(5), &cancel).await);
    }

    #[tokio::test]
    async fn test_closed_semaphore_rejects() {
        let semaphore = SlotSemaphore::new("test", 1);
        semaphore.close();
        let cancel = CancellationToken::new();
        assert_eq!(semaphore.try_enter().unwrap_err(), EnterError::Closed);
        assert_eq!(
            semaphore.enter(Duration::from_secs(1), &cancel).await.unwrap_err(),
            EnterError::Closed
        );
    }
}
