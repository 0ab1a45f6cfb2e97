//! Bounds simultaneous outbound weather fetches.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{AcquireError, Semaphore};

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;

/// Counting semaphore with a FIFO wait queue.
///
/// Tasks past the limit wait in arrival order; a queued task always runs
/// once a slot frees up.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots not currently held by a running task.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `task` once a slot is available.
    ///
    /// # Errors
    ///
    /// Returns `AcquireError` without running `task` if the semaphore has
    /// been closed. Nothing here closes it.
    pub async fn run<F, T>(&self, task: F) -> Result<T, AcquireError>
    where
        F: Future<Output = T>,
    {
        let _permit = self.semaphore.acquire().await?;
        Ok(task.await)
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_FETCHES)
    }
}
