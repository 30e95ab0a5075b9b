/*!
 * Toolkit: every primitive wired from one configuration
 */

use std::hash::Hash;
use std::sync::Arc;
use tether_core_resilience::{
    CircuitBreaker, ConcurrencyLimiter, ConnectionFactory, ConnectionPool, LruCache,
    ResilientClient, WorkerPool,
};
use tracing::{debug, info};

use crate::config::TetherConfig;
use crate::error::Result;

/// Shared breaker, limiter and client for one dependency, plus factories for
/// caches, pools and worker pools sized from the same configuration
///
/// Cloning yields another handle to the same breaker and limiter.
#[derive(Debug, Clone)]
pub struct Toolkit {
    config: Arc<TetherConfig>,
    breaker: CircuitBreaker,
    limiter: ConcurrencyLimiter,
    client: ResilientClient,
}

impl Toolkit {
    /// Validate `config` and build the shared primitives
    pub fn from_config(config: &TetherConfig) -> Result<Self> {
        Self::named("tether", config)
    }

    /// Like [`from_config`](Self::from_config), naming the breaker in log events
    pub fn named(name: &str, config: &TetherConfig) -> Result<Self> {
        config.validate()?;

        let breaker = CircuitBreaker::named(name, config.breaker_config());
        let limiter = ConcurrencyLimiter::new(config.limiter_config());
        let client = ResilientClient::new(config.client_config())
            .with_breaker(breaker.clone())
            .with_limiter(limiter.clone());

        debug!(
            name,
            failure_threshold = config.breaker.failure_threshold,
            max_attempts = config.retry.max_attempts,
            max_in_flight = config.limiter.max_in_flight,
            "toolkit ready"
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            breaker,
            limiter,
            client,
        })
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Client guarded by the shared breaker, one limiter slot per attempt
    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    /// Client for another dependency: its own breaker, the shared limiter
    pub fn client_for(&self, dependency: &str) -> ResilientClient {
        ResilientClient::new(self.config.client_config())
            .with_breaker(CircuitBreaker::named(
                dependency,
                self.config.breaker_config(),
            ))
            .with_limiter(self.limiter.clone())
    }

    /// A new cache of the configured capacity
    pub fn cache<K, V>(&self) -> LruCache<K, V>
    where
        K: Hash + Eq + Clone,
        V: Clone,
    {
        LruCache::new(self.config.cache.capacity)
    }

    /// A new pool over `factory`, opening connections lazily
    pub fn pool<T: Send + 'static>(
        &self,
        factory: Arc<dyn ConnectionFactory<T>>,
    ) -> ConnectionPool<T> {
        ConnectionPool::new(factory, self.config.pool_config())
    }

    /// A new pool with `min_idle` connections opened up front
    pub async fn connect_pool<T: Send + 'static>(
        &self,
        factory: Arc<dyn ConnectionFactory<T>>,
    ) -> Result<ConnectionPool<T>> {
        Ok(ConnectionPool::connect(factory, self.config.pool_config()).await?)
    }

    /// Spawn a worker pool; must be called inside a tokio runtime
    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(self.config.worker_pool_config())
    }

    /// Stop admitting work through the shared limiter and wait for admitted tasks
    pub async fn shutdown(&self) {
        info!(breaker = self.breaker.name(), "shutting down toolkit");
        self.limiter.shutdown().await;
    }
}
