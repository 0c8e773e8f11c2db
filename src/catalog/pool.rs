//! Bounded worker pool with a completion barrier.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Outcome counters of one pool run.
#[derive(Debug, Default)]
pub struct PoolStats {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl PoolStats {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    fn record(&self, ok: bool) {
        if ok {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Fixed-size pool: at most `workers` tasks in flight, remaining inputs wait
/// their turn, and [`run`](Self::run) returns only once every task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPool {
    workers: usize,
}

impl TaskPool {
    /// Creates a pool; zero workers is treated as one.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `task` over every input. A task reports success with `true`.
    ///
    /// Panicking tasks count as failures.
    pub async fn run<I, F, Fut>(&self, inputs: Vec<I>, task: F) -> PoolStats
    where
        I: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let stats = PoolStats::default();
        if inputs.is_empty() {
            return stats;
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let task = Arc::new(task);
        let mut set = JoinSet::new();

        for input in inputs {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                warn!("worker pool semaphore closed");
                break;
            };
            let task = Arc::clone(&task);
            set.spawn(async move {
                let _permit = permit;
                task(input).await
            });
        }

        debug!(tasks = set.len(), workers = self.workers, "waiting for pool");
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(ok) => stats.record(ok),
                Err(e) => {
                    warn!(error = %e, "pool task panicked");
                    stats.record(false);
                }
            }
        }
        stats
    }
}
