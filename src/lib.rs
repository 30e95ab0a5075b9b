/*!
 * Tether - client-side resilience and resource pooling
 *
 * Protects callers from unreliable or finite downstream dependencies with:
 * - A circuit breaker with a single half-open trial call
 * - Retries with exponential backoff, jitter and a delay ceiling
 * - A bounded connection pool with liveness checks and expiry
 * - A fixed-capacity LRU cache
 * - A concurrency limiter with optional rate pacing, and a worker pool
 *
 * The primitives live in `tether-core-resilience` and are re-exported here.
 * This crate adds TOML configuration, logging setup and [`Toolkit`], which
 * builds everything from one [`TetherConfig`].
 *
 * ```no_run
 * use tether::{TetherConfig, Toolkit};
 * use tether::resilience::ResilienceError;
 *
 * # async fn example() -> tether::Result<()> {
 * let config = TetherConfig::from_file("tether.toml")?;
 * tether::logging::init_logging(&config.logging)?;
 *
 * let toolkit = Toolkit::from_config(&config)?;
 * let value = toolkit
 *     .client()
 *     .execute(|| async { Ok::<_, ResilienceError>(42) })
 *     .await;
 * # let _ = value;
 * toolkit.shutdown().await;
 * # Ok(())
 * # }
 * ```
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod toolkit;

pub use tether_core_resilience as resilience;

// Re-export commonly used types
pub use config::{LogLevel, LoggingSettings, ShutdownMode, TetherConfig};
pub use error::{Result, TetherError};
pub use tether_core_resilience::prelude;
pub use toolkit::Toolkit;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
