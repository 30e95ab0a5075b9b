//! Tether Core Resilience: Pure-logic fault tolerance and pooling primitives
//!
//! # Overview
//!
//! This crate provides building blocks for talking to dependencies that are
//! unreliable, finite, or both. It includes:
//!
//! - **Circuit Breaker**: Fails fast while a dependency is unhealthy, probes it with a single trial call
//! - **Retry Policy**: Exponential backoff with jitter, clamped to a maximum delay
//! - **Resilient Client**: Retries behind a breaker, optionally through a limiter, pool or cache
//! - **Connection Pool**: Bounded reuse of expensive handles with liveness checks and expiry
//! - **LRU Cache**: Fixed-capacity, O(1) least-recently-used cache
//! - **Concurrency Limiter**: Caps tasks in flight, optionally paces their starts
//! - **Worker Pool**: Fixed workers over a bounded queue with an explicit shutdown policy
//! - **Call Context**: Cancellation and deadlines for every wait
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Transport protocols (HTTP, gRPC, message queues)
//! - Request/response serialization
//! - Application-specific notions of "retryable"
//!
//! Callers supply the operation, the connection factory and the failure
//! classification.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │  execute(op)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       LRU Cache (optional)              │  ← Skip the call on a hit
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Tracks failures, opens on threshold)  │
//! └─────────────┬───────────────────────────┘
//!               │  per attempt
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Concurrency Limiter               │  ← Bound parallelism, pace starts
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Connection Pool (optional)        │  ← Resource efficiency
//! │  (Reuse connections, health checks)     │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Service
//!               │
//!       retryable failure?
//!               │
//!               ▼
//!     Retry Policy backoff, then next attempt
//! ```
//!
//! # Usage Example
//!
//! ## Resilient Client
//!
//! ```no_run
//! use tether_core_resilience::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), CallError<ResilienceError>> {
//! let client = ResilientClient::new(ClientConfig {
//!     breaker: CircuitBreakerConfig {
//!         failure_threshold: 5,
//!         reset_timeout: Duration::from_secs(30),
//!     },
//!     retry: RetryPolicy::default(),
//! });
//!
//! let ctx = CallContext::with_timeout(Duration::from_secs(5));
//! let value = client
//!     .execute_with(&ctx, || async {
//!         // Your potentially failing operation
//!         Ok::<_, ResilienceError>(42)
//!     })
//!     .await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```
//!
//! ## Connection Pool
//!
//! ```no_run
//! use tether_core_resilience::{ConnectionPool, PoolConfig, ConnectionFactory, ResilienceError};
//! use std::sync::Arc;
//!
//! # #[derive(Clone)]
//! # struct MyConnection;
//! struct MyConnectionFactory;
//!
//! #[async_trait::async_trait]
//! impl ConnectionFactory<MyConnection> for MyConnectionFactory {
//!     async fn create(&self) -> Result<MyConnection, ResilienceError> {
//!         // Create your connection
//! #       Ok(MyConnection)
//!     }
//!
//!     async fn is_healthy(&self, _conn: &MyConnection) -> bool {
//!         // Check connection health
//!         true
//!     }
//! }
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let factory = Arc::new(MyConnectionFactory);
//! let pool = ConnectionPool::new_default(factory);
//!
//! // Acquire connection
//! let conn = pool.acquire().await?;
//! // Use connection...
//!
//! // Return to pool
//! pool.release(conn).await;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod classify;
pub mod client;
pub mod concurrency;
pub mod connection_pool;
pub mod context;
pub mod error;
pub mod lru_cache;
pub mod pacing;
pub mod retry;
pub mod worker_pool;

// Re-export main types for convenience
pub use circuit_breaker::{
    BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use classify::{ClassifyFailure, FailureKind};
pub use client::{ClientConfig, ResilientClient};
pub use concurrency::{
    detect_optimal_concurrency, AdmissionPermit, ConcurrencyLimiter, LimiterConfig, TaskHandle,
};
pub use connection_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats, PooledHandle};
pub use context::{CallContext, Interrupt};
pub use error::{CallError, ResilienceError};
pub use lru_cache::{CacheStats, LruCache};
pub use pacing::RatePacer;
pub use retry::RetryPolicy;
pub use worker_pool::{ShutdownPolicy, WorkerPool, WorkerPoolConfig};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use tether_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::classify::{ClassifyFailure, FailureKind};
    pub use super::client::{ClientConfig, ResilientClient};
    pub use super::concurrency::{ConcurrencyLimiter, LimiterConfig, TaskHandle};
    pub use super::connection_pool::{ConnectionFactory, ConnectionPool, PoolConfig};
    pub use super::context::CallContext;
    pub use super::error::{CallError, ResilienceError};
    pub use super::lru_cache::LruCache;
    pub use super::pacing::RatePacer;
    pub use super::retry::RetryPolicy;
    pub use super::worker_pool::{ShutdownPolicy, WorkerPool, WorkerPoolConfig};
}
