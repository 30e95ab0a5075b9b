/*!
 * Configuration types for Tether
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_core_resilience::{
    detect_optimal_concurrency, CircuitBreakerConfig, ClientConfig, LimiterConfig, PoolConfig,
    ResilienceError, RetryPolicy, ShutdownPolicy, WorkerPoolConfig,
};

use crate::error::{Result, TetherError};

/// Top-level configuration, one section per primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TetherConfig {
    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub limiter: LimiterSettings,

    #[serde(default)]
    pub worker_pool: WorkerPoolSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Circuit breaker section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the breaker stays open before admitting a trial call
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

/// Retry section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Random extra fraction added to each delay, in [0, 1)
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

/// Connection pool section
///
/// A zero `idle_timeout_secs` or `max_lifetime_secs` disables that expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum connections alive at once
    #[serde(default = "default_pool_capacity")]
    pub capacity: usize,

    #[serde(default = "default_min_idle")]
    pub min_idle: usize,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: default_pool_capacity(),
            min_idle: default_min_idle(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_lifetime_secs: default_max_lifetime_secs(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

/// LRU cache section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

/// Concurrency limiter section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterSettings {
    #[serde(default = "detect_optimal_concurrency")]
    pub max_in_flight: usize,

    /// Minimum spacing between task starts, 0 disables pacing
    #[serde(default)]
    pub min_interval_ms: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            max_in_flight: detect_optimal_concurrency(),
            min_interval_ms: 0,
        }
    }
}

/// Worker pool section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolSettings {
    #[serde(default = "detect_optimal_concurrency")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub shutdown_policy: ShutdownMode,

    /// Minimum spacing between job starts, 0 disables pacing
    #[serde(default)]
    pub min_interval_ms: u64,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            workers: detect_optimal_concurrency(),
            queue_capacity: default_queue_capacity(),
            shutdown_policy: ShutdownMode::default(),
            min_interval_ms: 0,
        }
    }
}

/// Fate of queued worker-pool jobs at shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Run queued jobs before stopping
    #[default]
    Drain,

    /// Drop queued jobs
    Reject,
}

impl From<ShutdownMode> for ShutdownPolicy {
    fn from(mode: ShutdownMode) -> Self {
        match mode {
            ShutdownMode::Drain => ShutdownPolicy::Drain,
            ShutdownMode::Reject => ShutdownPolicy::Reject,
        }
    }
}

/// Logging section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingSettings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Force debug output regardless of `log_level`
    #[serde(default)]
    pub verbose: bool,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_fraction() -> f64 {
    0.1
}

fn default_pool_capacity() -> usize {
    10
}

fn default_min_idle() -> usize {
    2
}

fn default_idle_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_lifetime_secs() -> u64 {
    1800 // 30 minutes
}

fn default_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_queue_capacity() -> usize {
    128
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl TetherConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: TetherConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check every section, naming the offending one in the error
    pub fn validate(&self) -> Result<()> {
        fn section(name: &str, result: std::result::Result<(), ResilienceError>) -> Result<()> {
            result.map_err(|e| TetherError::Config(format!("[{}] {}", name, e)))
        }

        section("breaker", self.breaker_config().validate())?;
        section("retry", self.retry_policy().validate())?;
        section("pool", self.pool_config().validate())?;
        if self.cache.capacity == 0 {
            return Err(TetherError::Config(
                "[cache] capacity must be > 0".to_string(),
            ));
        }
        section("limiter", self.limiter_config().validate())?;
        section("worker_pool", self.worker_pool_config().validate())?;
        Ok(())
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            reset_timeout: Duration::from_millis(self.breaker.reset_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            multiplier: self.retry.multiplier,
            jitter: self.retry.jitter_fraction,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            breaker: self.breaker_config(),
            retry: self.retry_policy(),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.pool.capacity,
            min_idle: self.pool.min_idle,
            idle_timeout: non_zero_secs(self.pool.idle_timeout_secs),
            max_lifetime: non_zero_secs(self.pool.max_lifetime_secs),
            acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
        }
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            max_in_flight: self.limiter.max_in_flight,
            min_interval: non_zero_ms(self.limiter.min_interval_ms),
        }
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers: self.worker_pool.workers,
            queue_capacity: self.worker_pool.queue_capacity,
            shutdown_policy: self.worker_pool.shutdown_policy.into(),
            min_interval: non_zero_ms(self.worker_pool.min_interval_ms),
        }
    }

    /// Give up quickly: one attempt, short breaker window, short pool wait
    pub fn fail_fast_preset() -> Self {
        Self {
            breaker: BreakerSettings {
                failure_threshold: 3,
                reset_timeout_ms: 10_000,
            },
            retry: RetrySettings {
                max_attempts: 1,
                ..Default::default()
            },
            pool: PoolSettings {
                acquire_timeout_ms: 1_000,
                ..Default::default()
            },
            worker_pool: WorkerPoolSettings {
                shutdown_policy: ShutdownMode::Reject,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Ride out long outages: more attempts, longer backoff, tolerant breaker
    pub fn patient_preset() -> Self {
        Self {
            breaker: BreakerSettings {
                failure_threshold: 10,
                reset_timeout_ms: 60_000,
            },
            retry: RetrySettings {
                max_attempts: 6,
                base_delay_ms: 200,
                max_delay_ms: 30_000,
                multiplier: 2.0,
                jitter_fraction: 0.2,
            },
            pool: PoolSettings {
                acquire_timeout_ms: 60_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
