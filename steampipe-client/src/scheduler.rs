//! Bounded-concurrency task pool for depot downloads.
//!
//! A fixed number of permits caps how many tasks run at once. Tasks are
//! independent: each gets its own result slot, and one failure never
//! cancels a sibling. `run` has join-all semantics; it returns only after
//! every submitted task finished or was skipped by cancellation.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::progress::ProgressCounters;
use crate::{Error, Result};

/// Default worker-pool width for chunk and file downloads.
pub const DEFAULT_POOL_WIDTH: usize = 6;

/// Fixed-width pool over tokio tasks.
pub struct DownloadPool {
    width: usize,
    counters: ProgressCounters,
}

impl DownloadPool {
    /// Create a pool with the default width.
    pub fn new() -> Self {
        Self::with_width(DEFAULT_POOL_WIDTH)
    }

    /// Create a pool with an explicit width (at least 1).
    pub fn with_width(width: usize) -> Self {
        Self {
            width: width.max(1),
            counters: ProgressCounters::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Shared progress counters; clone one per reporting loop or worker.
    pub fn counters(&self) -> ProgressCounters {
        self.counters.clone()
    }

    /// Request cancellation of queued work.
    pub fn cancel(&self) {
        self.counters.cancel();
    }

    /// Run all futures with at most `width` executing concurrently.
    ///
    /// Results come back in submission order, one per task. Tasks skipped
    /// because cancellation was requested before they acquired a permit
    /// report `Cancelled` for their slot.
    pub async fn run<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let total = tasks.len();
        debug!("Running {total} tasks with pool width {}", self.width);

        let semaphore = Arc::new(Semaphore::new(self.width));
        let mut join_set = JoinSet::new();

        for (slot, task) in tasks.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let counters = self.counters.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (slot, Err(Error::cancelled("worker pool closed")));
                };
                if counters.is_cancelled() {
                    return (slot, Err(Error::cancelled("task skipped")));
                }
                (slot, task.await)
            });
        }

        let mut results: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((slot, result)) => results[slot] = Some(result),
                Err(e) => warn!("Download task panicked or was aborted: {e}"),
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(Error::cancelled("task never completed"))))
            .collect()
    }
}

impl Default for DownloadPool {
    fn default() -> Self {
        Self::new()
    }
}
