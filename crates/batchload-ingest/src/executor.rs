//! Bounded worker pool for chunk writes
//!
//! At most `limit` tasks run at once. `submit` waits for a free slot, so a
//! producer that outpaces the writers is throttled rather than queuing
//! unbounded work. Slots are handed out in FIFO order (tokio semaphores are
//! fair).

use batchload_common::{BatchError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Default)]
struct ExecutorStats {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

/// Marks one running task; released on completion or panic
struct Slot<'a> {
    stats: &'a ExecutorStats,
}

impl<'a> Slot<'a> {
    fn enter(stats: &'a ExecutorStats) -> Self {
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        Self { stats }
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.stats.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fixed-size pool running chunk writes on the tokio runtime
#[derive(Clone)]
pub struct ChunkExecutor {
    permits: Arc<Semaphore>,
    limit: usize,
    stats: Arc<ExecutorStats>,
}

impl ChunkExecutor {
    /// A limit of zero is treated as one
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            stats: Arc::new(ExecutorStats::default()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `task` once a slot is free
    ///
    /// Waits while all slots are busy. A failing task does not affect
    /// siblings; its error is returned from the handle.
    pub async fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| BatchError::Executor(format!("worker pool closed: {}", e)))?;

        let stats = Arc::clone(&self.stats);
        trace!(
            available = self.permits.available_permits(),
            limit = self.limit,
            "Dispatching task"
        );

        let handle = tokio::spawn(async move {
            // Dropped in reverse order: the slot is released before the permit
            let _permit = permit;
            let _slot = Slot::enter(&stats);
            task.await
        });

        Ok(TaskHandle { handle })
    }

    /// Stop admitting new tasks; running tasks are unaffected
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of tasks observed running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.stats.completed.load(Ordering::SeqCst)
    }
}

/// Result of a submitted task
///
/// Resolves to the task's own result; a panic or runtime cancellation
/// becomes [`BatchError::Executor`].
pub struct TaskHandle<T> {
    handle: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task to finish
    pub async fn join(self) -> Result<T> {
        self.await
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(BatchError::Executor(format!("worker task panicked: {}", e))),
            Err(e) => Err(BatchError::Executor(format!("worker task cancelled: {}", e))),
        })
    }
}
