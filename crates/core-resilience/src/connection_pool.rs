//! Generic connection pool for reusable connections
//!
//! Bounds the number of concurrently open expensive handles and reuses them.
//! Handles are created lazily on demand (or eagerly via
//! [`ConnectionPool::connect`] / [`ConnectionPool::maintain_idle`]), checked for
//! liveness on checkout, checked for structural validity on release, and
//! expired by idle timeout and max lifetime.
//!
//! Capacity invariant: idle + checked out + being opened or closed <= `max_size`.
//! Waiters are served in FIFO order by the underlying semaphore.

use crate::context::{CallContext, Interrupt};
use crate::error::ResilienceError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Configuration for connection pool behavior
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Number of idle connections [`ConnectionPool::maintain_idle`] tops up to
    pub min_idle: usize,
    /// Maximum time a connection can remain idle before being closed
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime of a connection
    pub max_lifetime: Option<Duration>,
    /// Timeout for acquiring a connection from the pool
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 2,
            idle_timeout: Some(Duration::from_secs(300)), // 5 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_size == 0 {
            return Err(ResilienceError::InvalidConfig(
                "pool max_size must be > 0".to_string(),
            ));
        }
        if self.min_idle > self.max_size {
            return Err(ResilienceError::InvalidConfig(format!(
                "pool min_idle ({}) exceeds max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        Ok(())
    }
}

/// A connection wrapper that tracks metadata
#[derive(Debug)]
struct PooledConnection<T> {
    /// The actual connection
    conn: T,
    /// When this connection was created
    created_at: Instant,
    /// When this connection was last checked out or returned
    last_used: Instant,
}

impl<T> PooledConnection<T> {
    fn new(conn: T) -> Self {
        let now = Instant::now();
        Self {
            conn,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, config: &PoolConfig) -> bool {
        if let Some(idle_timeout) = config.idle_timeout {
            if self.last_used.elapsed() > idle_timeout {
                return true;
            }
        }

        if let Some(max_lifetime) = config.max_lifetime {
            if self.created_at.elapsed() > max_lifetime {
                return true;
            }
        }

        false
    }

    fn update_last_used(&mut self) {
        self.last_used = Instant::now();
    }
}

/// Factory trait for creating and validating connections
#[async_trait::async_trait]
pub trait ConnectionFactory<T: Send + 'static>: Send + Sync {
    /// Create a new connection
    async fn create(&self) -> Result<T, ResilienceError>;

    /// Cheap liveness check run before an idle connection is handed out
    async fn is_healthy(&self, conn: &T) -> bool;

    /// Structural check run when a connection is released
    fn is_valid(&self, _conn: &T) -> bool {
        true
    }

    /// Close a connection (optional cleanup)
    async fn close(&self, conn: T) {
        drop(conn);
    }
}

/// Internal pool state
struct PoolState<T> {
    /// Available connections, most recently returned at the back
    idle: VecDeque<PooledConnection<T>>,
    /// Checkout slots taken (handed out or being prepared for a caller)
    active: usize,
    /// Connections being opened by `maintain_idle`
    opening: usize,
    /// Released connections being closed, still holding their slot
    closing: usize,
    closed: bool,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            active: 0,
            opening: 0,
            closing: 0,
            closed: false,
        }
    }

    fn total_count(&self) -> usize {
        self.idle.len() + self.active + self.opening + self.closing
    }
}

struct Shared<T: Send + 'static> {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<T>>,
    state: Mutex<PoolState<T>>,
    /// One permit per checkout slot
    semaphore: Semaphore,
}

impl<T: Send + 'static> Shared<T> {
    /// Give back a checkout slot without returning a connection
    fn free_slot(&self) {
        {
            let mut state = self.state.lock();
            debug_assert!(state.active > 0, "pool active count underflow");
            state.active -= 1;
        }
        self.semaphore.add_permits(1);
    }

    fn debug_check_capacity(&self, state: &PoolState<T>) {
        debug_assert!(
            state.total_count() <= self.config.max_size,
            "pool over-provisioned: {} > {}",
            state.total_count(),
            self.config.max_size
        );
    }
}

/// A checkout slot held by a caller
///
/// Gives the slot back when dropped while still armed: preparation failed or
/// was cancelled, or a handle was dropped instead of released.
struct Reservation<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    armed: bool,
}

impl<T: Send + 'static> Reservation<T> {
    fn into_handle(self, pooled: PooledConnection<T>) -> PooledHandle<T> {
        PooledHandle {
            conn: pooled,
            slot: self,
        }
    }
}

impl<T: Send + 'static> Drop for Reservation<T> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.free_slot();
        }
    }
}

/// Gives a released connection's slot back when dropped
///
/// When the connection was being closed, the closing count is settled first
/// so no replacement is opened while it is still alive.
struct SlotReturn<'a, T: Send + 'static> {
    shared: &'a Shared<T>,
    closing: bool,
}

impl<T: Send + 'static> Drop for SlotReturn<'_, T> {
    fn drop(&mut self) {
        if self.closing {
            self.shared.state.lock().closing -= 1;
        }
        self.shared.semaphore.add_permits(1);
    }
}

/// A connection checked out of a [`ConnectionPool`]
///
/// Return it with [`ConnectionPool::release`]. Dropping it instead discards
/// the connection and frees its slot for a replacement.
pub struct PooledHandle<T: Send + 'static> {
    // Dropped before `slot`, so the connection is gone before its slot is reused
    conn: PooledConnection<T>,
    slot: Reservation<T>,
}

impl<T: Send + 'static> PooledHandle<T> {
    /// When the underlying connection was created
    pub fn created_at(&self) -> Instant {
        self.conn.created_at
    }

    /// Take the connection out, leaving the slot accounting to the caller
    fn into_parts(self) -> (PooledConnection<T>, Arc<Shared<T>>) {
        let PooledHandle { conn, mut slot } = self;
        slot.armed = false;
        (conn, slot.shared.clone())
    }
}

impl<T: Send + 'static> Deref for PooledHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.conn.conn
    }
}

impl<T: Send + 'static> DerefMut for PooledHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.conn.conn
    }
}

impl<T: fmt::Debug + Send + 'static> fmt::Debug for PooledHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledHandle")
            .field("conn", &self.conn.conn)
            .finish()
    }
}

/// A generic connection pool
///
/// # Example
/// ```no_run
/// use tether_core_resilience::{ConnectionPool, PoolConfig, ConnectionFactory, ResilienceError};
/// use std::sync::Arc;
///
/// # #[derive(Clone)]
/// # struct MyConnection { id: usize }
/// struct MyConnectionFactory;
///
/// #[async_trait::async_trait]
/// impl ConnectionFactory<MyConnection> for MyConnectionFactory {
///     async fn create(&self) -> Result<MyConnection, ResilienceError> {
///         Ok(MyConnection { id: 1 })
///     }
///
///     async fn is_healthy(&self, _conn: &MyConnection) -> bool {
///         true
///     }
/// }
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let factory = Arc::new(MyConnectionFactory);
/// let pool = ConnectionPool::new(factory, PoolConfig::default());
///
/// let conn = pool.acquire().await?;
/// // Use connection...
/// pool.release(conn).await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> ConnectionPool<T> {
    /// Create a new, empty connection pool
    pub fn new(factory: Arc<dyn ConnectionFactory<T>>, mut config: PoolConfig) -> Self {
        config.max_size = config.max_size.max(1);
        config.min_idle = config.min_idle.min(config.max_size);
        let max_size = config.max_size;
        Self {
            shared: Arc::new(Shared {
                config,
                factory,
                state: Mutex::new(PoolState::new()),
                semaphore: Semaphore::new(max_size),
            }),
        }
    }

    /// Create a connection pool with default configuration
    pub fn new_default(factory: Arc<dyn ConnectionFactory<T>>) -> Self {
        Self::new(factory, PoolConfig::default())
    }

    /// Create a pool and eagerly open `min_idle` connections
    pub async fn connect(
        factory: Arc<dyn ConnectionFactory<T>>,
        config: PoolConfig,
    ) -> Result<Self, ResilienceError> {
        let pool = Self::new(factory, config);
        pool.maintain_idle().await?;
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Acquire a connection, waiting at most `acquire_timeout`
    pub async fn acquire(&self) -> Result<PooledHandle<T>, ResilienceError> {
        let ctx = CallContext::with_timeout(self.shared.config.acquire_timeout);
        self.acquire_with(&ctx).await
    }

    /// Acquire a connection, waiting until one is free or `ctx` is interrupted
    ///
    /// Idle connections that fail the liveness check are closed and replaced
    /// transparently; only a failure to create a replacement is reported.
    pub async fn acquire_with(&self, ctx: &CallContext) -> Result<PooledHandle<T>, ResilienceError> {
        let started = Instant::now();

        tokio::select! {
            biased;
            interrupt = ctx.interrupted() => Err(match interrupt {
                Interrupt::Cancelled => ResilienceError::Cancelled,
                Interrupt::DeadlineExceeded => ResilienceError::AcquireTimeout(started.elapsed()),
            }),
            result = self.checkout() => result,
        }
    }

    /// Try to acquire without waiting for a slot
    pub async fn try_acquire(&self) -> Result<PooledHandle<T>, ResilienceError> {
        let permit = self.shared.semaphore.try_acquire().map_err(|e| match e {
            tokio::sync::TryAcquireError::Closed => ResilienceError::PoolClosed,
            tokio::sync::TryAcquireError::NoPermits => ResilienceError::PoolExhausted,
        })?;
        permit.forget();
        self.prepare().await
    }

    async fn checkout(&self) -> Result<PooledHandle<T>, ResilienceError> {
        let permit = self
            .shared
            .semaphore
            .acquire()
            .await
            .map_err(|_| ResilienceError::PoolClosed)?;

        // The slot is tracked by `active` from here on
        permit.forget();
        self.prepare().await
    }

    /// Turn a freshly taken permit into a ready connection
    async fn prepare(&self) -> Result<PooledHandle<T>, ResilienceError> {
        // Claiming the slot and taking an idle connection happen together so
        // the connection is never counted as both idle and active
        let mut candidate = {
            let mut state = self.shared.state.lock();
            if state.closed {
                drop(state);
                self.shared.semaphore.add_permits(1);
                return Err(ResilienceError::PoolClosed);
            }
            state.active += 1;
            state.idle.pop_back()
        };
        let reservation = Reservation {
            shared: self.shared.clone(),
            armed: true,
        };

        let factory = &self.shared.factory;

        // Try to reuse an idle connection, most recently returned first
        while let Some(mut pooled) = candidate.take() {
            if pooled.is_expired(&self.shared.config) {
                trace!("closing expired idle connection");
                factory.close(pooled.conn).await;
            } else if !factory.is_healthy(&pooled.conn).await {
                debug!("idle connection failed liveness check, replacing");
                factory.close(pooled.conn).await;
            } else {
                pooled.update_last_used();
                return Ok(reservation.into_handle(pooled));
            }
            candidate = self.shared.state.lock().idle.pop_back();
        }

        // No idle connections, create a new one within our slot
        let conn = factory.create().await?;
        trace!("opened new pooled connection");
        let handle = reservation.into_handle(PooledConnection::new(conn));
        self.shared.debug_check_capacity(&self.shared.state.lock());
        Ok(handle)
    }

    /// Return a connection to the pool
    ///
    /// Structurally invalid or expired connections, and any connection
    /// returned after [`close`](Self::close), are closed instead of kept.
    pub async fn release(&self, handle: PooledHandle<T>) {
        self.check_in(handle, true).await;
    }

    /// Close a checked-out connection instead of returning it
    ///
    /// For connections left in an unknown state, e.g. by an operation that
    /// was cancelled partway through.
    pub async fn discard(&self, handle: PooledHandle<T>) {
        self.check_in(handle, false).await;
    }

    async fn check_in(&self, handle: PooledHandle<T>, reusable: bool) {
        let (mut pooled, owner) = handle.into_parts();
        debug_assert!(
            Arc::ptr_eq(&self.shared, &owner),
            "connection released to a different pool"
        );

        let shared = &self.shared;
        let keep = reusable
            && shared.factory.is_valid(&pooled.conn)
            && !pooled.is_expired(&shared.config);

        let discarded = {
            let mut state = shared.state.lock();
            debug_assert!(state.active > 0, "pool active count underflow");
            state.active -= 1;

            if keep && !state.closed {
                pooled.update_last_used();
                state.idle.push_back(pooled);
                None
            } else {
                state.closing += 1;
                Some((pooled, state.closed))
            }
        };
        // Slot goes back after the idle entry is visible or the discarded
        // connection is fully closed
        let _slot = SlotReturn {
            shared,
            closing: discarded.is_some(),
        };

        if let Some((pooled, pool_closed)) = discarded {
            debug!(pool_closed, reusable, "discarding returned connection");
            shared.factory.close(pooled.conn).await;
        }
    }

    /// Stop handing out connections and close every idle one
    ///
    /// Pending and future `acquire` calls fail with `PoolClosed`; connections
    /// still checked out are closed when they are released.
    pub async fn close(&self) {
        let idle = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.shared.semaphore.close();

        info!(idle = idle.len(), "closing connection pool");
        for pooled in idle {
            self.shared.factory.close(pooled.conn).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.active,
            total: state.total_count(),
            max_size: self.shared.config.max_size,
        }
    }

    /// Close all idle connections
    ///
    /// Each one is closed while holding a slot, so no replacement can be
    /// opened before it is gone.
    pub async fn clear_idle(&self) {
        let shared = &self.shared;
        let mut cleared = 0usize;

        while let Ok(permit) = shared.semaphore.try_acquire() {
            let Some(pooled) = shared.state.lock().idle.pop_front() else {
                break;
            };
            shared.factory.close(pooled.conn).await;
            drop(permit);
            cleared += 1;
        }

        if cleared > 0 {
            debug!(cleared, "closed idle connections");
        }
    }

    /// Open connections until `min_idle` are idle or the pool is full
    ///
    /// Returns the number of connections opened.
    pub async fn maintain_idle(&self) -> Result<usize, ResilienceError> {
        let shared = &self.shared;
        let mut created = 0;

        loop {
            // Hold a slot while opening so a concurrent acquire cannot overshoot
            let Ok(permit) = shared.semaphore.try_acquire() else {
                break;
            };
            {
                let mut state = shared.state.lock();
                if state.closed
                    || state.idle.len() >= shared.config.min_idle
                    || state.total_count() >= shared.config.max_size
                {
                    break;
                }
                state.opening += 1;
            }

            let result = shared.factory.create().await;

            let orphan = {
                let mut state = shared.state.lock();
                state.opening -= 1;
                match result {
                    Ok(conn) if !state.closed => {
                        state.idle.push_back(PooledConnection::new(conn));
                        shared.debug_check_capacity(&state);
                        created += 1;
                        None
                    }
                    Ok(conn) => Some(conn),
                    Err(e) => return Err(e),
                }
            };
            drop(permit);

            if let Some(conn) = orphan {
                shared.factory.close(conn).await;
                break;
            }
        }

        if created > 0 {
            debug!(created, "pre-opened idle connections");
        }
        Ok(created)
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of idle connections
    pub idle: usize,
    /// Number of checked-out connections
    pub active: usize,
    /// Total connections (idle, checked out, being opened or closed)
    pub total: usize,
    /// Maximum pool size
    pub max_size: usize,
}

impl PoolStats {
    /// Get pool utilization as a percentage
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.total as f64 / self.max_size as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[derive(Debug, Clone)]
    struct TestConnection {
        id: usize,
        healthy: Arc<AtomicBool>,
        valid: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct TestFactory {
        counter: AtomicUsize,
        closed: AtomicUsize,
        fail_create: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ConnectionFactory<TestConnection> for TestFactory {
        async fn create(&self) -> Result<TestConnection, ResilienceError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(ResilienceError::ConnectionCreation("refused".to_string()));
            }
            let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TestConnection {
                id,
                healthy: Arc::new(AtomicBool::new(true)),
                valid: Arc::new(AtomicBool::new(true)),
            })
        }

        async fn is_healthy(&self, conn: &TestConnection) -> bool {
            conn.healthy.load(Ordering::SeqCst)
        }

        fn is_valid(&self, conn: &TestConnection) -> bool {
            conn.valid.load(Ordering::SeqCst)
        }

        async fn close(&self, _conn: TestConnection) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(max_size: usize) -> (Arc<TestFactory>, ConnectionPool<TestConnection>) {
        let factory = Arc::new(TestFactory::default());
        let config = PoolConfig {
            max_size,
            min_idle: 0,
            acquire_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        (factory.clone(), ConnectionPool::new(factory, config))
    }

    #[tokio::test]
    async fn test_pool_acquire_release() {
        let (_, pool) = pool(5);

        let conn1 = pool.acquire().await.unwrap();
        assert_eq!(conn1.id, 1);

        let stats = pool.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 0);

        pool.release(conn1).await;

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.utilization(), 20.0);
    }

    #[tokio::test]
    async fn test_pool_reuse() {
        let (factory, pool) = pool(5);

        let conn1 = pool.acquire().await.unwrap();
        let id1 = conn1.id;
        pool.release(conn1).await;

        let conn2 = pool.acquire().await.unwrap();
        assert_eq!(conn2.id, id1);
        assert_eq!(factory.counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pool_max_size() {
        let (_, pool) = pool(2);

        let conn1 = pool.acquire().await.unwrap();
        let conn2 = pool.acquire().await.unwrap();

        let result = pool.acquire().await;
        assert!(matches!(result, Err(ResilienceError::AcquireTimeout(_))));
        assert!(matches!(
            pool.try_acquire().await,
            Err(ResilienceError::PoolExhausted)
        ));

        pool.release(conn1).await;
        let _conn3 = pool.acquire().await.unwrap();

        pool.release(conn2).await;
    }

    #[tokio::test]
    async fn test_second_acquire_waits_for_release() {
        let (_, pool) = pool(1);

        let first = pool.acquire().await.unwrap();
        let ctx = CallContext::new();
        let mut second = task::spawn(pool.acquire_with(&ctx));
        assert_pending!(second.poll());

        pool.release(first).await;
        assert!(second.is_woken());
        let handle = assert_ready_ok!(second.poll());
        assert_eq!(handle.id, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_idle_connection_is_replaced() {
        let (factory, pool) = pool(1);

        let conn = pool.acquire().await.unwrap();
        let healthy = conn.healthy.clone();
        pool.release(conn).await;
        healthy.store(false, Ordering::SeqCst);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, 2);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_connection_discarded_on_release() {
        let (factory, pool) = pool(1);

        let conn = pool.acquire().await.unwrap();
        conn.valid.store(false, Ordering::SeqCst);
        pool.release(conn).await;

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.acquire().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_discard_closes_even_valid_connection() {
        let (factory, pool) = pool(1);

        let conn = pool.acquire().await.unwrap();
        pool.discard(conn).await;

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().total, 0);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.acquire().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_creation_failure_frees_capacity() {
        let (factory, pool) = pool(1);

        factory.fail_create.store(true, Ordering::SeqCst);
        assert!(matches!(
            pool.acquire().await,
            Err(ResilienceError::ConnectionCreation(_))
        ));
        assert_eq!(pool.stats().total, 0);

        factory.fail_create.store(false, Ordering::SeqCst);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_handle_frees_capacity() {
        let (_, pool) = pool(1);

        let conn = pool.acquire().await.unwrap();
        drop(conn);

        assert_eq!(pool.stats().total, 0);
        assert_eq!(pool.acquire().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_reservation() {
        let (_, pool) = pool(1);
        let held = pool.acquire().await.unwrap();

        let ctx = CallContext::new();
        let waiter = {
            let pool = pool.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { pool.acquire_with(&ctx).await.map(|h| h.id) })
        };
        tokio::task::yield_now().await;
        ctx.cancel();

        assert_eq!(waiter.await.unwrap(), Err(ResilienceError::Cancelled));
        pool.release(held).await;
        assert_eq!(pool.stats().active, 0);
        assert!(pool.try_acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_rejects_and_wakes_waiters() {
        let (factory, pool) = pool(1);

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.acquire_with(&CallContext::new()).await.map(|h| h.id)
            })
        };
        tokio::task::yield_now().await;

        pool.close().await;
        assert_eq!(waiter.await.unwrap(), Err(ResilienceError::PoolClosed));
        assert!(matches!(pool.acquire().await, Err(ResilienceError::PoolClosed)));

        // Outstanding connection is closed on its way back
        pool.release(held).await;
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().total, 0);
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_maintain_idle_respects_capacity() {
        let factory = Arc::new(TestFactory::default());
        let config = PoolConfig {
            max_size: 3,
            min_idle: 3,
            ..Default::default()
        };
        let pool = ConnectionPool::connect(factory.clone(), config).await.unwrap();
        assert_eq!(pool.stats().idle, 3);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        // Two checked out, one idle: topping up would exceed max_size
        assert_eq!(pool.maintain_idle().await.unwrap(), 0);
        assert_eq!(pool.stats().total, 3);

        pool.release(a).await;
        pool.release(b).await;
        pool.clear_idle().await;
        assert_eq!(pool.stats().total, 0);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_expires_connections() {
        let factory = Arc::new(TestFactory::default());
        let config = PoolConfig {
            max_size: 2,
            min_idle: 0,
            idle_timeout: Some(Duration::from_secs(10)),
            max_lifetime: None,
            ..Default::default()
        };
        let pool = ConnectionPool::new(factory.clone(), config);

        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, 2);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig { max_size: 0, ..Default::default() }.validate().is_err());
        assert!(PoolConfig { max_size: 1, min_idle: 2, ..Default::default() }
            .validate()
            .is_err());
    }
}
