//! Fixed worker pool pulling from one bounded shared queue
//!
//! The worker-pool variant of concurrency limiting: `workers` long-lived tasks
//! take jobs from a queue of `queue_capacity`, so at most `workers` jobs run at
//! once and submitters wait while the queue is full.
//!
//! What happens to queued jobs at shutdown is chosen up front with
//! [`ShutdownPolicy`]:
//!
//! | Policy   | Running jobs | Queued jobs                        |
//! |----------|--------------|------------------------------------|
//! | `Drain`  | finish       | run before the workers exit        |
//! | `Reject` | finish       | dropped; handles get `TaskRejected` |

use crate::concurrency::{detect_optimal_concurrency, panic_message, TaskHandle};
use crate::context::CallContext;
use crate::error::ResilienceError;
use crate::pacing::RatePacer;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

type Job = BoxFuture<'static, ()>;

/// What to do with queued jobs when the pool shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Run every queued job before the workers exit
    #[default]
    Drain,
    /// Drop queued jobs; their handles resolve to `TaskRejected`
    Reject,
}

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of long-lived workers (minimum 1)
    pub workers: usize,
    /// Jobs that may wait in the queue (minimum 1)
    pub queue_capacity: usize,
    pub shutdown_policy: ShutdownPolicy,
    /// Minimum spacing between two job starts, `None` for no pacing
    pub min_interval: Option<Duration>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: detect_optimal_concurrency(),
            queue_capacity: 128,
            shutdown_policy: ShutdownPolicy::Drain,
            min_interval: None,
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
            ..Default::default()
        }
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = Some(min_interval);
        self
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.workers == 0 {
            return Err(ResilienceError::InvalidConfig(
                "workers must be > 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ResilienceError::InvalidConfig(
                "queue_capacity must be > 0".to_string(),
            ));
        }
        if self.min_interval == Some(Duration::ZERO) {
            return Err(ResilienceError::InvalidConfig(
                "min_interval must be > 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

struct PoolInner {
    /// `None` once shutdown has begun
    sender: parking_lot::Mutex<Option<mpsc::Sender<Job>>>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    /// Wakes submitters blocked on a full queue
    closing: CancellationToken,
    /// Tells workers to stop pulling (reject policy only)
    reject: CancellationToken,
    tracker: TaskTracker,
    config: WorkerPoolConfig,
}

/// A fixed set of workers sharing one bounded job queue
///
/// Must be created inside a tokio runtime. Cloning yields another handle to
/// the same pool.
///
/// # Example
/// ```no_run
/// use tether_core_resilience::{WorkerPool, WorkerPoolConfig, ResilienceError};
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let pool = WorkerPool::new(WorkerPoolConfig::new(4, 32));
///
/// let mut handles = Vec::new();
/// for n in 0..10u64 {
///     handles.push(pool.submit(async move { n * n }).await?);
/// }
///
/// let mut total = 0;
/// for handle in handles {
///     total += handle.join().await?;
/// }
/// assert_eq!(total, 285);
///
/// pool.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("queued", &self.queued())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn the workers
    pub fn new(mut config: WorkerPoolConfig) -> Self {
        config.workers = config.workers.max(1);
        config.queue_capacity = config.queue_capacity.max(1);

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let reject = CancellationToken::new();
        let tracker = TaskTracker::new();
        let pacer = config
            .min_interval
            .filter(|interval| !interval.is_zero())
            .and_then(|interval| RatePacer::new(interval).ok());

        for id in 0..config.workers {
            tracker.spawn(worker_loop(
                id,
                receiver.clone(),
                reject.clone(),
                pacer.clone(),
            ));
        }
        debug!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "worker pool started"
        );

        Self {
            inner: Arc::new(PoolInner {
                sender: parking_lot::Mutex::new(Some(sender)),
                receiver,
                closing: CancellationToken::new(),
                reject,
                tracker,
                config,
            }),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    /// Jobs waiting in the queue
    pub fn queued(&self) -> usize {
        match &*self.inner.sender.lock() {
            Some(sender) => sender.max_capacity() - sender.capacity(),
            None => 0,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closing.is_cancelled()
    }

    /// Queue `task`, waiting for space if the queue is full
    pub async fn submit<F>(&self, task: F) -> Result<TaskHandle<F::Output>, ResilienceError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.submit_with(&CallContext::new(), task).await
    }

    /// [`submit`](Self::submit) with cancellation and deadline for the queue wait
    pub async fn submit_with<F>(
        &self,
        ctx: &CallContext,
        task: F,
    ) -> Result<TaskHandle<F::Output>, ResilienceError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let sender = self
            .inner
            .sender
            .lock()
            .clone()
            .ok_or(ResilienceError::LimiterShutdown)?;

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let result = AssertUnwindSafe(task)
                .catch_unwind()
                .await
                .map_err(|payload| ResilienceError::TaskPanicked(panic_message(&*payload)));
            // Receiver may have been dropped; the job still ran
            let _ = tx.send(result);
        });

        tokio::select! {
            biased;
            _ = self.inner.closing.cancelled() => Err(ResilienceError::LimiterShutdown),
            interrupt = ctx.interrupted() => Err(interrupt.into()),
            sent = sender.send(job) => {
                sent.map_err(|_| ResilienceError::LimiterShutdown)?;
                Ok(TaskHandle::queued(rx))
            }
        }
    }

    /// Stop accepting jobs, apply the shutdown policy and wait for the workers
    ///
    /// Submitters waiting for queue space are rejected with `LimiterShutdown`.
    /// Idempotent.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let sender = inner.sender.lock().take();
        if let Some(sender) = sender {
            info!(
                policy = ?inner.config.shutdown_policy,
                queued = sender.max_capacity() - sender.capacity(),
                "shutting down worker pool"
            );
            inner.closing.cancel();
            if inner.config.shutdown_policy == ShutdownPolicy::Reject {
                inner.reject.cancel();
            }
            inner.tracker.close();
        }

        inner.tracker.wait().await;

        if inner.config.shutdown_policy == ShutdownPolicy::Reject {
            let mut receiver = inner.receiver.lock().await;
            receiver.close();
            let mut rejected = 0usize;
            while let Ok(job) = receiver.try_recv() {
                drop(job);
                rejected += 1;
            }
            if rejected > 0 {
                info!(rejected, "dropped queued jobs");
            }
        }
        debug!("worker pool stopped");
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    reject: CancellationToken,
    pacer: Option<RatePacer>,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = reject.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        // Channel closed and empty, or told to stop pulling
        let Some(job) = job else {
            break;
        };

        if let Some(pacer) = &pacer {
            tokio::select! {
                biased;
                _ = reject.cancelled() => break,
                _ = pacer.wait() => {}
            }
        }

        job.await;
    }
    trace!(worker = id, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[tokio::test]
    async fn test_fan_out_fan_in() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(4, 8));

        let mut handles = Vec::new();
        for n in 0..20u64 {
            handles.push(pool.submit(async move { n * n }).await.unwrap());
        }

        let mut total = 0;
        for handle in handles {
            total += handle.join().await.unwrap();
        }
        assert_eq!(total, (0..20u64).map(|n| n * n).sum());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_at_most_workers_run_at_once() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(2, 16));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            handles.push(
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap(),
            );
        }
        for handle in handles {
            handle.join().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_full_queue_suspends_submitter() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 1));
        let (started_tx, started_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let first = pool
            .submit(async move {
                let _ = started_tx.send(());
                let _ = gate_rx.await;
            })
            .await
            .unwrap();
        started_rx.await.unwrap();

        // Worker busy, this one fills the queue
        let second = pool.submit(async { 2 }).await.unwrap();
        let mut third = task::spawn(pool.submit(async { 3 }));
        assert_pending!(third.poll());

        gate_tx.send(()).unwrap();
        first.join().await.unwrap();
        assert_eq!(second.join().await.unwrap(), 2);
        assert!(third.is_woken());
        let third = assert_ready_ok!(third.poll());
        assert_eq!(third.join().await.unwrap(), 3);
    }

    async fn pool_with_backlog(
        policy: ShutdownPolicy,
    ) -> (WorkerPool, Vec<TaskHandle<u32>>, oneshot::Sender<()>) {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 4).with_shutdown_policy(policy));
        let (started_tx, started_rx) = oneshot::channel();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let mut handles = vec![pool
            .submit(async move {
                let _ = started_tx.send(());
                let _ = gate_rx.await;
                1
            })
            .await
            .unwrap()];
        started_rx.await.unwrap();
        for n in 2..=3 {
            handles.push(pool.submit(async move { n }).await.unwrap());
        }
        (pool, handles, gate_tx)
    }

    fn open_gate_later(gate: oneshot::Sender<()>) {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = gate.send(());
        });
    }

    #[tokio::test]
    async fn test_drain_policy_runs_queued_jobs() {
        let (pool, handles, gate) = pool_with_backlog(ShutdownPolicy::Drain).await;

        open_gate_later(gate);
        pool.shutdown().await;

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.join().await.unwrap());
        }
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reject_policy_drops_queued_jobs() {
        let (pool, mut handles, gate) = pool_with_backlog(ShutdownPolicy::Reject).await;

        open_gate_later(gate);
        pool.shutdown().await;

        // The running job finishes, the queued ones never start
        let first = handles.remove(0);
        assert_eq!(first.join().await.unwrap(), 1);
        for handle in handles {
            assert_eq!(handle.join().await, Err(ResilienceError::TaskRejected));
        }
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_rejected() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(2, 2));
        pool.shutdown().await;
        pool.shutdown().await;

        assert!(pool.is_shut_down());
        assert_eq!(
            pool.submit(async {}).await.map(|_| ()),
            Err(ResilienceError::LimiterShutdown)
        );
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(WorkerPoolConfig::new(1, 4));

        let bad = pool
            .submit(async {
                panic!("job failed");
            })
            .await
            .unwrap();
        let good = pool.submit(async { "still here" }).await.unwrap();

        assert_eq!(
            bad.join().await,
            Err(ResilienceError::TaskPanicked("job failed".to_string()))
        );
        assert_eq!(good.join().await.unwrap(), "still here");
    }

    #[test]
    fn test_config_validation() {
        assert!(WorkerPoolConfig::default().validate().is_ok());
        assert!(WorkerPoolConfig {
            workers: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(WorkerPoolConfig::new(1, 1)
            .with_min_interval(Duration::ZERO)
            .validate()
            .is_err());
        // Constructor clamps instead of failing
        assert_eq!(WorkerPoolConfig::new(0, 0).workers, 1);
    }
}
