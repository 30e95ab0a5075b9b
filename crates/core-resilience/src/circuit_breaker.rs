//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents a client from hammering a dependency that is
//! currently failing. It has three states:
//! - Closed: Normal operation, requests pass through
//! - Open: Dependency is presumed unhealthy, requests fail immediately
//! - HalfOpen: Exactly one trial request probes whether it has recovered
//!
//! All bookkeeping happens under a short synchronous lock that is never held
//! across an `.await`, so [`CircuitBreaker::allow`] and the `record_*` calls
//! complete in O(1) and never suspend.

use super::error::ResilienceError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, a single trial request is allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from open to half-open
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(
                "failure_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Internal phase; `Open` carries its timestamp so an open breaker always
/// knows when it opened.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { opened_at: Instant },
    /// `trial` holds the id of the outstanding trial permit, if any
    HalfOpen { trial: Option<u64> },
}

#[derive(Debug)]
struct CircuitBreakerState {
    phase: Phase,
    consecutive_failures: u32,
    next_trial_id: u64,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            phase: Phase::Closed,
            consecutive_failures: 0,
            next_trial_id: 0,
        }
    }

    fn state(&self) -> CircuitState {
        match self.phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn grant_trial(&mut self) -> u64 {
        self.next_trial_id += 1;
        self.phase = Phase::HalfOpen {
            trial: Some(self.next_trial_id),
        };
        self.next_trial_id
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

/// Circuit breaker guarding one downstream dependency
///
/// Cloning is cheap and every clone shares the same state, so one instance
/// can be handed to every caller of the dependency.
///
/// # Example
/// ```no_run
/// use tether_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
///
///     let permit = breaker.allow()?;
///     // ... talk to the dependency ...
///     permit.success();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("default", config)
    }

    /// Create a breaker whose name shows up in its log events
    pub fn named(name: impl Into<String>, mut config: CircuitBreakerConfig) -> Self {
        config.failure_threshold = config.failure_threshold.max(1);
        Self {
            name: Arc::from(name.into()),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker
    ///
    /// An open breaker whose reset timeout has elapsed still reports `Open`
    /// until the next [`allow`](Self::allow) moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state()
    }

    /// Get current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock();
        BreakerSnapshot {
            state: state.state(),
            consecutive_failures: state.consecutive_failures,
            opened_at: match state.phase {
                Phase::Open { opened_at } => Some(opened_at),
                _ => None,
            },
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Closed;
        state.consecutive_failures = 0;
    }

    /// Ask for permission to call the dependency
    ///
    /// Closed always grants. Open rejects until the reset timeout has
    /// elapsed; the first caller after that moves the breaker to half-open and
    /// receives the only trial permit. Half-open rejects everyone else until
    /// the trial is resolved.
    pub fn allow(&self) -> Result<BreakerPermit, ResilienceError> {
        let mut state = self.state.lock();

        let phase = state.phase;
        let trial = match phase {
            Phase::Closed => None,
            Phase::Open { opened_at } => {
                if opened_at.elapsed() < self.config.reset_timeout {
                    return Err(ResilienceError::CircuitOpen);
                }
                let id = state.grant_trial();
                debug!(breaker = %self.name, trial = id, "circuit half-open, admitting trial call");
                Some(id)
            }
            Phase::HalfOpen { trial: Some(_) } => return Err(ResilienceError::CircuitOpen),
            Phase::HalfOpen { trial: None } => {
                let id = state.grant_trial();
                debug!(breaker = %self.name, trial = id, "admitting trial call");
                Some(id)
            }
        };

        Ok(BreakerPermit {
            breaker: self.clone(),
            trial,
            resolved: false,
        })
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.on_success(&mut self.state.lock());
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.on_failure(&mut self.state.lock());
    }

    fn on_success(&self, state: &mut CircuitBreakerState) {
        let phase = state.phase;

        match phase {
            Phase::Closed => {
                state.consecutive_failures = 0;
            }
            Phase::HalfOpen { .. } => {
                state.phase = Phase::Closed;
                state.consecutive_failures = 0;
                info!(breaker = %self.name, "circuit closed, dependency recovered");
            }
            Phase::Open { .. } => {
                // Late result from a call admitted before the breaker opened
                debug!(breaker = %self.name, "ignoring success reported while open");
            }
        }
    }

    fn on_failure(&self, state: &mut CircuitBreakerState) {
        let phase = state.phase;

        match phase {
            Phase::Closed => {
                state.consecutive_failures += 1;

                if state.consecutive_failures >= self.config.failure_threshold {
                    state.phase = Phase::Open {
                        opened_at: Instant::now(),
                    };
                    warn!(
                        breaker = %self.name,
                        failures = state.consecutive_failures,
                        reset_timeout = ?self.config.reset_timeout,
                        "circuit opened"
                    );
                }
            }
            Phase::HalfOpen { .. } => {
                state.phase = Phase::Open {
                    opened_at: Instant::now(),
                };
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            Phase::Open { .. } => {
                debug!(breaker = %self.name, "ignoring failure reported while open");
            }
        }

        debug_assert!(
            !matches!(state.phase, Phase::Closed)
                || state.consecutive_failures < self.config.failure_threshold,
            "closed breaker at or above its failure threshold"
        );
    }

    /// Apply the outcome of a permitted call
    ///
    /// While half-open only the outstanding trial may decide the next state;
    /// late outcomes from calls admitted before the breaker opened are dropped.
    fn settle(&self, trial: Option<u64>, success: bool) {
        let mut state = self.state.lock();
        if let Phase::HalfOpen { trial: current } = state.phase {
            if trial.is_none() || current != trial {
                debug!(breaker = %self.name, "ignoring outcome of a non-trial call while half-open");
                return;
            }
        }
        if success {
            self.on_success(&mut state);
        } else {
            self.on_failure(&mut state);
        }
    }

    /// Give up an outstanding trial without evidence either way
    fn abandon_trial(&self, id: u64) {
        let mut state = self.state.lock();
        let phase = state.phase;
        if let Phase::HalfOpen { trial: Some(current) } = phase {
            if current == id {
                state.phase = Phase::HalfOpen { trial: None };
                debug!(breaker = %self.name, trial = id, "trial call abandoned");
            }
        }
    }

    /// Execute an operation without retry logic
    ///
    /// Errors that [should trip the breaker](ResilienceError::should_trip_breaker)
    /// are recorded as failures; the rest release the permit without evidence.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ResilienceError>>,
    {
        let permit = self.allow()?;

        match op().await {
            Ok(result) => {
                permit.success();
                Ok(result)
            }
            Err(e) => {
                if e.should_trip_breaker() {
                    permit.failure();
                } else {
                    permit.release();
                }
                Err(e)
            }
        }
    }
}

/// Permission to make one call through a [`CircuitBreaker`]
///
/// Resolve it with [`success`](Self::success) or [`failure`](Self::failure).
/// Dropping an unresolved trial permit (e.g. because the caller was
/// cancelled) frees the half-open slot so the next caller can probe.
#[must_use = "a permit should be resolved with success() or failure()"]
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: CircuitBreaker,
    trial: Option<u64>,
    resolved: bool,
}

impl BreakerPermit {
    /// Whether this permit is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.settle(self.trial, true);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.settle(self.trial, false);
    }

    /// Release the permit without reporting an outcome
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        if let Some(id) = self.trial {
            self.breaker.abandon_trial(id);
        }
    }
}
