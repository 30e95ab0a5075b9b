//! Concurrency limiting for independent tasks
//!
//! [`ConcurrencyLimiter`] caps how many tasks run at once and, optionally,
//! paces how often a new one may start. Admission is FIFO: waiters are served
//! in arrival order by the underlying semaphore.
//!
//! Submission is fire-and-continue. [`ConcurrencyLimiter::submit`] waits only
//! for admission, spawns the task and hands back a [`TaskHandle`] the caller
//! may await (or drop) independently.

use crate::context::CallContext;
use crate::error::ResilienceError;
use crate::pacing::RatePacer;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::{TaskTracker, TaskTrackerToken};
use tracing::{debug, info, warn};

/// Limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Maximum number of tasks admitted at once
    pub max_in_flight: usize,
    /// Minimum spacing between two admissions, `None` for no pacing
    pub min_interval: Option<Duration>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_in_flight: detect_optimal_concurrency(),
            min_interval: None,
        }
    }
}

impl LimiterConfig {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            min_interval: None,
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = Some(min_interval);
        self
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_in_flight == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_in_flight must be > 0".to_string(),
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

/// Default concurrency for I/O-bound work: twice the core count, capped at 16
pub fn detect_optimal_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to detect available parallelism, defaulting to 1");
            1
        });
    (cpus * 2).min(16)
}

struct LimiterShared {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    pacer: Option<RatePacer>,
    max: usize,
}

/// Bounds the number of concurrently running tasks
///
/// Cloning yields another handle to the same limiter.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    shared: Arc<LimiterShared>,
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("max_in_flight", &self.shared.max)
            .field("in_flight", &self.in_flight())
            .field("paced", &self.shared.pacer.is_some())
            .finish()
    }
}

impl ConcurrencyLimiter {
    /// Create a limiter; `max_in_flight` is raised to at least 1
    pub fn new(config: LimiterConfig) -> Self {
        let max = config.max_in_flight.max(1);
        let pacer = config
            .min_interval
            .filter(|interval| !interval.is_zero())
            .and_then(|interval| RatePacer::new(interval).ok());

        Self {
            shared: Arc::new(LimiterShared {
                semaphore: Arc::new(Semaphore::new(max)),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                pacer,
                max,
            }),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.shared.max
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        if self.is_shut_down() {
            return 0;
        }
        self.shared.semaphore.available_permits()
    }

    /// Slots currently held by admitted callers
    pub fn in_flight(&self) -> usize {
        self.shared.max - self.shared.semaphore.available_permits().min(self.shared.max)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Wait for admission
    pub async fn acquire(&self) -> Result<AdmissionPermit, ResilienceError> {
        self.acquire_with(&CallContext::new()).await
    }

    /// Wait for admission unless `ctx` is interrupted or the limiter shuts down
    ///
    /// A slot taken while still waiting for the pacing interval is handed back
    /// if the wait is interrupted.
    pub async fn acquire_with(&self, ctx: &CallContext) -> Result<AdmissionPermit, ResilienceError> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(ResilienceError::LimiterShutdown);
        }
        // Tracked from the start so shutdown also waits for callers it is rejecting
        let token = shared.tracker.token();

        let permit = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return Err(ResilienceError::LimiterShutdown),
            interrupt = ctx.interrupted() => return Err(interrupt.into()),
            acquired = shared.semaphore.clone().acquire_owned() => {
                acquired.map_err(|_| ResilienceError::LimiterShutdown)?
            }
        };

        if let Some(pacer) = &shared.pacer {
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => return Err(ResilienceError::LimiterShutdown),
                paced = pacer.wait_with(ctx) => paced?,
            }
        }

        Ok(AdmissionPermit {
            _permit: permit,
            _token: token,
        })
    }

    /// Take a slot only if one is free and the pacing interval has passed
    pub fn try_acquire(&self) -> Result<AdmissionPermit, ResilienceError> {
        let shared = &self.shared;
        if shared.shutdown.is_cancelled() {
            return Err(ResilienceError::LimiterShutdown);
        }
        let permit = shared
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::Closed => ResilienceError::LimiterShutdown,
                TryAcquireError::NoPermits => ResilienceError::TaskRejected,
            })?;
        if let Some(pacer) = &shared.pacer {
            if !pacer.try_admit() {
                return Err(ResilienceError::TaskRejected);
            }
        }
        Ok(AdmissionPermit {
            _permit: permit,
            _token: shared.tracker.token(),
        })
    }

    /// Wait for admission, then run `task` concurrently
    ///
    /// Returns as soon as the task is spawned; its slot is released when it
    /// finishes.
    pub async fn submit<F>(&self, task: F) -> Result<TaskHandle<F::Output>, ResilienceError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.submit_with(&CallContext::new(), task).await
    }

    /// [`submit`](Self::submit) with cancellation and deadline for the admission wait
    pub async fn submit_with<F>(
        &self,
        ctx: &CallContext,
        task: F,
    ) -> Result<TaskHandle<F::Output>, ResilienceError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = self.acquire_with(ctx).await?;
        let handle = tokio::spawn(async move {
            let _permit = permit;
            task.await
        });
        Ok(TaskHandle::spawned(handle))
    }

    /// Stop admitting and wait for every admitted task to finish
    ///
    /// Callers still waiting for a slot are rejected with `LimiterShutdown`.
    /// Tasks already admitted run to completion. Idempotent.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if !shared.shutdown.is_cancelled() {
            info!(in_flight = self.in_flight(), "shutting down concurrency limiter");
            shared.shutdown.cancel();
            shared.semaphore.close();
            shared.tracker.close();
        }
        shared.tracker.wait().await;
        debug!("concurrency limiter drained");
    }
}

/// Permission to run one task; the slot is released on drop
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    _token: TaskTrackerToken,
}

/// Result future of a submitted task
///
/// Dropping the handle detaches the task; it keeps running.
#[derive(Debug)]
#[must_use = "dropping a TaskHandle detaches the task"]
pub struct TaskHandle<T> {
    inner: HandleInner<T>,
}

#[derive(Debug)]
enum HandleInner<T> {
    Spawned(JoinHandle<T>),
    Queued(oneshot::Receiver<Result<T, ResilienceError>>),
}

impl<T> TaskHandle<T> {
    pub(crate) fn spawned(handle: JoinHandle<T>) -> Self {
        Self {
            inner: HandleInner::Spawned(handle),
        }
    }

    pub(crate) fn queued(rx: oneshot::Receiver<Result<T, ResilienceError>>) -> Self {
        Self {
            inner: HandleInner::Queued(rx),
        }
    }

    /// Wait for the task's output
    ///
    /// Fails with `TaskPanicked` if the task panicked and `TaskRejected` if
    /// it was dropped from a queue before it ran.
    pub async fn join(self) -> Result<T, ResilienceError> {
        match self.inner {
            HandleInner::Spawned(handle) => handle.await.map_err(|e| {
                if e.is_panic() {
                    ResilienceError::TaskPanicked(panic_message(&*e.into_panic()))
                } else {
                    ResilienceError::Cancelled
                }
            }),
            HandleInner::Queued(rx) => rx.await.unwrap_or(Err(ResilienceError::TaskRejected)),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".to_string()
    }
}
