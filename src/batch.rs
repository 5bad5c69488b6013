//! Bounded worker pool for state-independent batch jobs.
//!
//! Turn processing is strictly sequential per session; the only
//! sanctioned concurrency elsewhere is this pool, used for jobs that
//! read an immutable snapshot and never touch live per-turn state
//! (translating a set of lore entries, for example). Results come back
//! in input order regardless of completion order; merging them into a
//! session happens through normal session ownership, not here.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default concurrency when none is given.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;

/// A reusable pool that runs batches with bounded parallelism.
#[derive(Debug, Clone)]
pub struct BatchPool {
    permits: Arc<Semaphore>,
}

impl Default for BatchPool {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CONCURRENCY)
    }
}

impl BatchPool {
    /// A pool allowing at most `max_concurrency` jobs at once. A zero
    /// limit is treated as one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Run `worker` over every item, at most the pool's limit at a time.
    ///
    /// The output vector is index-aligned with `items`: result `i`
    /// belongs to item `i`, whatever order the jobs finished in. The
    /// worker receives the item index alongside the item so per-item
    /// failures can be reported against their source.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, worker: F) -> Vec<R>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = R>,
    {
        let jobs = items.into_iter().enumerate().map(|(index, item)| {
            let permits = Arc::clone(&self.permits);
            let job = worker(index, item);
            async move {
                // Never closed, so acquisition only fails if the pool is
                // torn down mid-batch; run unthrottled in that case.
                let _permit = permits.acquire().await.ok();
                job.await
            }
        });
        join_all(jobs).await
    }
}
