//! Resilient client: retries with backoff behind a circuit breaker
//!
//! One logical call goes through these steps:
//!
//! 1. Ask the breaker for a permit. A rejection fails fast with
//!    [`CallError::BreakerOpen`] and is not recorded against the breaker.
//! 2. For each attempt: take a limiter slot (if a limiter is attached), run
//!    the operation, give the slot back.
//! 3. Classify the outcome. Success records a success. A non-retryable
//!    failure records a failure and returns. A retryable failure sleeps for
//!    the policy's backoff and tries again, or, on the last attempt, records a
//!    failure and returns [`CallError::RetryExhausted`].
//!
//! Each terminal outcome touches the breaker exactly once. Waits (limiter
//! slot, pooled handle, backoff, the operation itself) are interruptible
//! through the [`CallContext`]; an interrupted call releases its breaker
//! permit without recording anything.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::classify::{ClassifyFailure, FailureKind};
use crate::concurrency::ConcurrencyLimiter;
use crate::connection_pool::{ConnectionPool, PooledHandle};
use crate::context::{CallContext, Interrupt};
use crate::error::{CallError, ResilienceError};
use crate::lru_cache::LruCache;
use crate::retry::RetryPolicy;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};

/// Breaker and retry settings for one dependency
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
}

/// Executes operations against one dependency with retries and breaker protection
///
/// Clones share the breaker and limiter.
///
/// # Example
/// ```no_run
/// use tether_core_resilience::{ClientConfig, ResilientClient, ResilienceError};
///
/// # async fn example() {
/// let client = ResilientClient::new(ClientConfig::default());
///
/// let result = client
///     .execute(|| async { Ok::<_, ResilienceError>("pong") })
///     .await;
/// assert_eq!(result.unwrap(), "pong");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ResilientClient {
    breaker: CircuitBreaker,
    policy: Arc<RetryPolicy>,
    limiter: Option<ConcurrencyLimiter>,
}

impl ResilientClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(config.breaker),
            policy: Arc::new(config.retry),
            limiter: None,
        }
    }

    /// Use an existing breaker, e.g. one shared by every client of a dependency
    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// Take a limiter slot around every attempt
    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> Option<&ConcurrencyLimiter> {
        self.limiter.as_ref()
    }

    /// Run `op` with retries, classifying failures through [`ClassifyFailure`]
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure,
    {
        self.execute_with(&CallContext::new(), op).await
    }

    /// [`execute`](Self::execute) with cancellation and deadline
    pub async fn execute_with<F, Fut, T, E>(
        &self,
        ctx: &CallContext,
        op: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure,
    {
        self.execute_classified(ctx, op, E::failure_kind).await
    }

    /// Run `op` with retries, classifying failures with `classify`
    ///
    /// ```no_run
    /// use tether_core_resilience::{CallContext, ClientConfig, FailureKind, ResilientClient};
    ///
    /// # async fn fetch() -> Result<String, u16> { Err(503) }
    /// # async fn example() {
    /// let client = ResilientClient::new(ClientConfig::default());
    /// let by_status = |status: &u16| {
    ///     if *status >= 500 {
    ///         FailureKind::Retryable
    ///     } else {
    ///         FailureKind::NonRetryable
    ///     }
    /// };
    /// let _ = client
    ///     .execute_classified(&CallContext::new(), fetch, by_status)
    ///     .await;
    /// # }
    /// ```
    pub async fn execute_classified<F, Fut, T, E, C>(
        &self,
        ctx: &CallContext,
        mut op: F,
        classify: C,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> FailureKind,
    {
        self.run(ctx, &NoLease, |_: &()| op(), classify).await
    }

    /// Run `op` against a connection drawn from `pool` for every attempt
    ///
    /// The handle is returned to the pool after each attempt. `op` receives a
    /// clone of the pooled value, so `H` is typically a cheap shared handle.
    /// Failing to obtain a handle ends the call with [`CallError::Resource`]
    /// and is not recorded against the breaker.
    pub async fn execute_pooled<H, F, Fut, T, E>(
        &self,
        ctx: &CallContext,
        pool: &ConnectionPool<H>,
        mut op: F,
    ) -> Result<T, CallError<E>>
    where
        H: Clone + Send + 'static,
        F: FnMut(H) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure,
    {
        self.run(
            ctx,
            pool,
            |handle: &PooledHandle<H>| op(H::clone(handle)),
            E::failure_kind,
        )
        .await
    }

    /// Serve `key` from `cache`, or run `op` and cache its success
    ///
    /// A cache hit never touches the breaker.
    pub async fn execute_cached<K, F, Fut, T, E>(
        &self,
        ctx: &CallContext,
        cache: &LruCache<K, T>,
        key: K,
        op: F,
    ) -> Result<T, CallError<E>>
    where
        K: Hash + Eq + Clone,
        T: Clone,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure,
    {
        if let Some(hit) = cache.get(&key) {
            return Ok(hit);
        }
        let value = self.execute_with(ctx, op).await?;
        cache.put(key, value.clone());
        Ok(value)
    }

    async fn run<L, F, Fut, T, E, C>(
        &self,
        ctx: &CallContext,
        lease: &L,
        mut op: F,
        classify: C,
    ) -> Result<T, CallError<E>>
    where
        L: Lease,
        F: FnMut(&L::Guard) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> FailureKind,
    {
        if let Some(interrupt) = ctx.check() {
            return Err(interrupted(interrupt, 0, None));
        }

        let permit = match self.breaker.allow() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(breaker = %self.breaker.name(), "call rejected by open circuit");
                return Err(CallError::BreakerOpen);
            }
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last: Option<E> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let slot = match &self.limiter {
                Some(limiter) => match limiter.acquire_with(ctx).await {
                    Ok(slot) => Some(slot),
                    Err(e) => {
                        permit.release();
                        return Err(resource_error(ctx, e, attempt - 1, last));
                    }
                },
                None => None,
            };

            let guard = match lease.acquire(ctx).await {
                Ok(guard) => guard,
                Err(e) => {
                    permit.release();
                    return Err(resource_error(ctx, e, attempt - 1, last));
                }
            };

            let outcome = tokio::select! {
                biased;
                interrupt = ctx.interrupted() => Err(interrupt),
                result = op(&guard) => Ok(result),
            };
            // An attempt cut off midway leaves the resource in an unknown state
            match outcome {
                Ok(_) => lease.release(guard).await,
                Err(_) => lease.discard(guard).await,
            }
            drop(slot);

            let result = match outcome {
                Ok(result) => result,
                Err(interrupt) => {
                    permit.release();
                    return Err(interrupted(interrupt, attempt, last));
                }
            };

            let err = match result {
                Ok(value) => {
                    permit.success();
                    if attempt > 1 {
                        debug!(attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            match classify(&err) {
                FailureKind::NonRetryable => {
                    permit.failure();
                    debug!(attempt, "non-retryable failure");
                    return Err(CallError::NonRetryable {
                        attempt,
                        source: err,
                    });
                }
                FailureKind::Retryable if attempt >= max_attempts => {
                    permit.failure();
                    warn!(
                        breaker = %self.breaker.name(),
                        attempts = attempt,
                        "retries exhausted"
                    );
                    return Err(CallError::RetryExhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                FailureKind::Retryable => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(attempt, ?delay, "retryable failure, backing off");
                    last = Some(err);

                    tokio::select! {
                        biased;
                        interrupt = ctx.interrupted() => {
                            permit.release();
                            return Err(interrupted(interrupt, attempt, last));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Per-attempt resource held while the operation runs
trait Lease {
    type Guard;

    async fn acquire(&self, ctx: &CallContext) -> Result<Self::Guard, ResilienceError>;

    async fn release(&self, guard: Self::Guard);

    async fn discard(&self, guard: Self::Guard);
}

struct NoLease;

impl Lease for NoLease {
    type Guard = ();

    async fn acquire(&self, _ctx: &CallContext) -> Result<(), ResilienceError> {
        Ok(())
    }

    async fn release(&self, _guard: ()) {}

    async fn discard(&self, _guard: ()) {}
}

impl<H: Send + 'static> Lease for ConnectionPool<H> {
    type Guard = PooledHandle<H>;

    async fn acquire(&self, ctx: &CallContext) -> Result<PooledHandle<H>, ResilienceError> {
        self.acquire_with(ctx).await
    }

    async fn release(&self, guard: PooledHandle<H>) {
        ConnectionPool::release(self, guard).await;
    }

    async fn discard(&self, guard: PooledHandle<H>) {
        ConnectionPool::discard(self, guard).await;
    }
}

fn interrupted<E>(interrupt: Interrupt, attempts: u32, last: Option<E>) -> CallError<E> {
    match interrupt {
        Interrupt::Cancelled => CallError::Cancelled { attempts, last },
        Interrupt::DeadlineExceeded => CallError::DeadlineExceeded { attempts, last },
    }
}

fn resource_error<E>(
    ctx: &CallContext,
    err: ResilienceError,
    attempts: u32,
    last: Option<E>,
) -> CallError<E> {
    match err {
        ResilienceError::Cancelled => interrupted(Interrupt::Cancelled, attempts, last),
        ResilienceError::DeadlineExceeded => {
            interrupted(Interrupt::DeadlineExceeded, attempts, last)
        }
        // The pool reports the caller's own deadline as an acquire timeout
        ResilienceError::AcquireTimeout(_)
            if ctx.check() == Some(Interrupt::DeadlineExceeded) =>
        {
            interrupted(Interrupt::DeadlineExceeded, attempts, last)
        }
        other => CallError::Resource(other),
    }
}
