//! Pool and handle lifecycle states.
//!
//! ```text
//! Initial --initialize--> Open --dispose--> Disposed
//! Initial --dispose-----> Disposed
//! Open    --clear-------> Open   (generation bump only)
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::PoolError;

/// Lifecycle state of a connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    /// Constructed but not yet initialized.
    Initial = 0,
    /// Accepting acquisitions.
    Open = 1,
    /// Shut down; terminal.
    Disposed = 2,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initial,
            1 => Self::Open,
            _ => Self::Disposed,
        }
    }

    /// Check if acquisitions are allowed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the pool has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

/// Atomic, CAS-guarded pool state.
#[derive(Debug)]
pub(crate) struct PoolStateCell(AtomicU8);

impl PoolStateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(PoolState::Initial as u8))
    }

    pub(crate) fn get(&self) -> PoolState {
        PoolState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; returns `false` if another caller won.
    pub(crate) fn try_transition(&self, from: PoolState, to: PoolState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `Disposed` from any state; returns `false` if already there.
    pub(crate) fn try_dispose(&self) -> bool {
        self.0.swap(PoolState::Disposed as u8, Ordering::AcqRel) != PoolState::Disposed as u8
    }

    pub(crate) fn ensure_not_disposed(&self) -> Result<(), PoolError> {
        if self.get().is_disposed() {
            return Err(PoolError::Disposed);
        }
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> Result<(), PoolError> {
        match self.get() {
            PoolState::Open => Ok(()),
            PoolState::Initial => Err(PoolError::NotInitialized),
            PoolState::Disposed => Err(PoolError::Disposed),
        }
    }
}

/// Lifecycle state of one acquired handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Holding a reference on its pooled connection.
    Live,
    /// Reference released; further use fails.
    Disposed,
}

impl HandleState {
    /// Check if the handle may still be used.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}
