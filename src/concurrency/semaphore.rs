//! Counting semaphore with FIFO-fair waiters.

use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;

/// Bounds the number of concurrent holders to `capacity` permits.
///
/// Waiters are served in the order they called [`Semaphore::acquire`]. A
/// released permit goes straight to the oldest waiter, so permits are never
/// left idle while someone is queued.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<tokio::sync::Semaphore>,
    capacity: usize,
}

/// A held permit. Dropping it (or calling [`SemaphoreGuard::release`]) returns
/// the permit to the semaphore.
#[derive(Debug)]
pub struct SemaphoreGuard {
    _permit: OwnedSemaphorePermit,
}

impl SemaphoreGuard {
    /// Release the permit explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Semaphore {
    /// Create a semaphore with `permits` permits (at least one).
    pub fn new(permits: usize) -> Self {
        let capacity = permits.max(1);
        Self {
            inner: Arc::new(tokio::sync::Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a permit, waiting behind earlier callers if none is free.
    pub async fn acquire(&self) -> Result<SemaphoreGuard> {
        let permit = self.inner.clone().acquire_owned().await.map_err(|_| {
            Error::runtime_with_context(
                "Semaphore closed",
                ErrorContext::new().with_source("semaphore"),
            )
        })?;
        Ok(SemaphoreGuard { _permit: permit })
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<SemaphoreGuard> {
        self.inner
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| SemaphoreGuard { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }

    /// Number of permits currently held.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available_permits())
    }
}
