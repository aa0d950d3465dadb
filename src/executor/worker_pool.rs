//! Bounded worker pool for provider calls.
//!
//! At most `max_workers` submitted futures run at once; further submissions
//! wait for a slot instead of being rejected. Each submission carries one
//! deadline covering both the wait and the execution.
//!
//! The pool is an application-owned resource. [`PoolSlot`] creates it lazily
//! on first use, exactly once even under concurrent first callers, and
//! drains it on shutdown.

use crate::config::WorkerPoolConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerPoolError {
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    /// Deadline elapsed while queued or running
    #[error("Pool task timed out after {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("Pool task panicked: {0}")]
    Panicked(String),

    /// The task was aborted before completing
    #[error("Pool task cancelled")]
    Cancelled,
}

#[derive(Debug, Default)]
struct AtomicPoolMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    rejected: AtomicU64,
    in_flight: AtomicUsize,
}

/// Snapshot of pool activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolMetrics {
    pub max_workers: usize,
    pub submitted: u64,
    pub completed: u64,
    pub timed_out: u64,
    /// Submissions refused because the pool was shutting down
    pub rejected: u64,
    /// Tasks currently holding a worker slot
    pub in_flight: usize,
    /// Tasks waiting for a worker slot
    pub queued: usize,
}

/// Decrements the in-flight gauge however the task ends
struct InFlight(Arc<AtomicPoolMetrics>);

impl InFlight {
    fn enter(metrics: &Arc<AtomicPoolMetrics>) -> Self {
        metrics.in_flight.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(metrics))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bounded pool running submitted futures on the tokio runtime
#[derive(Debug)]
pub struct WorkerPool {
    max_workers: usize,
    call_timeout: Duration,
    shutdown_grace: Duration,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    running: AtomicBool,
    /// Fired when the shutdown grace period runs out
    abort_remaining: CancellationToken,
    metrics: Arc<AtomicPoolMetrics>,
}

impl WorkerPool {
    pub fn new(config: &WorkerPoolConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        info!(
            max_workers = max_workers,
            call_timeout_ms = config.call_timeout_ms,
            "Worker pool created"
        );

        Self {
            max_workers,
            call_timeout: config.call_timeout(),
            shutdown_grace: config.shutdown_grace(),
            semaphore: Arc::new(Semaphore::new(max_workers)),
            tracker: TaskTracker::new(),
            running: AtomicBool::new(true),
            abort_remaining: CancellationToken::new(),
            metrics: Arc::new(AtomicPoolMetrics::default()),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Submit a future using the pool's default call timeout
    pub fn submit<F, T>(&self, task: F) -> Result<PoolTask<T>, WorkerPoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with_timeout(task, self.call_timeout)
    }

    /// Submit a future whose wait plus execution is bounded by `timeout`.
    ///
    /// The returned [`PoolTask`] aborts the work when dropped.
    pub fn submit_with_timeout<F, T>(
        &self,
        task: F,
        timeout: Duration,
    ) -> Result<PoolTask<T>, WorkerPoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_running() {
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(WorkerPoolError::ShuttingDown);
        }
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);

        let semaphore = Arc::clone(&self.semaphore);
        let metrics = Arc::clone(&self.metrics);
        let abort = self.abort_remaining.clone();

        let handle = self.tracker.spawn(async move {
            let work = async {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| WorkerPoolError::ShuttingDown)?;
                let _in_flight = InFlight::enter(&metrics);
                Ok::<T, WorkerPoolError>(task.await)
            };

            let outcome = tokio::select! {
                biased;
                _ = abort.cancelled() => Err(WorkerPoolError::ShuttingDown),
                result = tokio::time::timeout(timeout, work) => match result {
                    Ok(result) => result,
                    Err(_) => Err(WorkerPoolError::TimedOut { timeout }),
                },
            };

            match &outcome {
                Ok(_) => metrics.completed.fetch_add(1, Ordering::Relaxed),
                Err(WorkerPoolError::TimedOut { .. }) => {
                    metrics.timed_out.fetch_add(1, Ordering::Relaxed)
                }
                Err(_) => 0,
            };
            outcome
        });

        Ok(PoolTask { handle })
    }

    pub fn metrics(&self) -> WorkerPoolMetrics {
        let in_flight = self.metrics.in_flight.load(Ordering::Relaxed);
        WorkerPoolMetrics {
            max_workers: self.max_workers,
            submitted: self.metrics.submitted.load(Ordering::Relaxed),
            completed: self.metrics.completed.load(Ordering::Relaxed),
            timed_out: self.metrics.timed_out.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            in_flight,
            queued: self.tracker.len().saturating_sub(in_flight),
        }
    }

    /// Stop accepting work and wait for in-flight tasks.
    ///
    /// Tasks still running after the grace period are cancelled. Returns
    /// `true` when everything finished within the grace period.
    pub async fn shutdown(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            debug!("Worker pool already shut down");
            self.tracker.wait().await;
            return true;
        }

        self.tracker.close();
        info!(
            pending = self.tracker.len(),
            grace_ms = self.shutdown_grace.as_millis() as u64,
            "Worker pool draining"
        );

        let drained = tokio::time::timeout(self.shutdown_grace, self.tracker.wait())
            .await
            .is_ok();

        if !drained {
            warn!(
                remaining = self.tracker.len(),
                "Worker pool grace period elapsed, cancelling remaining tasks"
            );
            self.abort_remaining.cancel();
            self.semaphore.close();
            self.tracker.wait().await;
        }

        info!(drained = drained, "Worker pool shut down");
        drained
    }
}

/// Handle to a submitted task. Awaiting yields the task's output; dropping
/// it aborts the task.
#[derive(Debug)]
pub struct PoolTask<T> {
    handle: JoinHandle<Result<T, WorkerPoolError>>,
}

impl<T> PoolTask<T> {
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<T> Future for PoolTask<T> {
    type Output = Result<T, WorkerPoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(WorkerPoolError::Cancelled),
            Err(e) => Err(WorkerPoolError::Panicked(e.to_string())),
        })
    }
}

impl<T> Drop for PoolTask<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Lazily-created, process-wide worker pool.
///
/// The first caller of [`PoolSlot::get`] builds the pool; concurrent first
/// callers block until that single instance exists.
#[derive(Debug)]
pub struct PoolSlot {
    config: WorkerPoolConfig,
    pool: OnceLock<Arc<WorkerPool>>,
}

impl PoolSlot {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            pool: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Arc<WorkerPool> {
        Arc::clone(
            self.pool
                .get_or_init(|| Arc::new(WorkerPool::new(&self.config))),
        )
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.get().is_some()
    }

    /// Drain the pool if it was ever created
    pub async fn shutdown(&self) -> bool {
        match self.pool.get() {
            Some(pool) => pool.shutdown().await,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn config(max_workers: usize, call_timeout_ms: u64) -> WorkerPoolConfig {
        WorkerPoolConfig {
            max_workers,
            call_timeout_ms,
            shutdown_grace_ms: 1_000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_submissions_queue() {
        let pool = WorkerPool::new(&config(2, 10_000));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..5)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(100)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i
                })
                .unwrap()
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.metrics().completed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_covers_queueing() {
        let pool = WorkerPool::new(&config(1, 500));

        let slow = pool
            .submit(async {
                sleep(Duration::from_secs(10)).await;
            })
            .unwrap();
        let queued = pool.submit(async { "never ran" }).unwrap();

        assert_eq!(
            slow.await,
            Err(WorkerPoolError::TimedOut {
                timeout: Duration::from_millis(500)
            })
        );
        assert!(matches!(queued.await, Err(WorkerPoolError::TimedOut { .. })));
        assert_eq!(pool.metrics().timed_out, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_task_aborts_work() {
        let pool = WorkerPool::new(&config(2, 10_000));
        let finished = Arc::new(AtomicBool::new(false));

        let task = {
            let finished = Arc::clone(&finished);
            pool.submit(async move {
                sleep(Duration::from_millis(100)).await;
                finished.store(true, Ordering::SeqCst);
            })
            .unwrap()
        };
        drop(task);

        sleep(Duration::from_millis(500)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_and_rejects() {
        let pool = WorkerPool::new(&config(2, 10_000));
        let task = pool
            .submit(async {
                sleep(Duration::from_millis(100)).await;
                7
            })
            .unwrap();

        let (drained, value) = tokio::join!(pool.shutdown(), task);
        assert!(drained);
        assert_eq!(value, Ok(7));

        assert!(matches!(
            pool.submit(async {}),
            Err(WorkerPoolError::ShuttingDown)
        ));
        assert_eq!(pool.metrics().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_after_grace() {
        let pool = WorkerPool::new(&WorkerPoolConfig {
            max_workers: 1,
            call_timeout_ms: 60_000,
            shutdown_grace_ms: 100,
        });
        let task = pool
            .submit(async {
                sleep(Duration::from_secs(30)).await;
            })
            .unwrap();

        let (drained, outcome) = tokio::join!(pool.shutdown(), task);
        assert!(!drained);
        assert_eq!(outcome, Err(WorkerPoolError::ShuttingDown));
    }

    #[test]
    fn test_pool_slot_creates_single_instance() {
        let slot = Arc::new(PoolSlot::new(config(3, 1_000)));
        assert!(!slot.is_initialized());

        let pools: Vec<Arc<WorkerPool>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| slot.get())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(slot.is_initialized());
        assert!(pools.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(pools[0].max_workers(), 3);
    }
}
