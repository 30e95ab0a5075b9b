/*!
 * Integration tests for file-based configuration
 *
 * Loads TOML files from disk, builds a Toolkit from them and drives the
 * primitives it produces.
 */

use std::time::Duration;
use tempfile::TempDir;
use tether::config::{LogLevel, ShutdownMode, TetherConfig};
use tether::resilience::{CallContext, CallError, CircuitState, ResilienceError};
use tether::{TetherError, Toolkit};

/// Test saving and reloading a configuration file
#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tether.toml");

    let mut config = TetherConfig::patient_preset();
    config.cache.capacity = 64;
    config.worker_pool.shutdown_policy = ShutdownMode::Reject;
    config.logging.log_level = LogLevel::Warn;
    config.logging.log_file = Some(dir.path().join("tether.log"));
    config.to_file(&path).unwrap();

    let loaded = TetherConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

/// Test that a hand-written file only needs the options it changes
#[test]
fn test_sparse_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tether.toml");
    std::fs::write(
        &path,
        r#"
[breaker]
failure_threshold = 2

[limiter]
max_in_flight = 3
min_interval_ms = 5
"#,
    )
    .unwrap();

    let config = TetherConfig::from_file(&path).unwrap();
    assert_eq!(config.breaker.failure_threshold, 2);
    assert_eq!(config.breaker.reset_timeout_ms, 60_000);
    assert_eq!(config.limiter_config().max_in_flight, 3);
    assert_eq!(
        config.limiter_config().min_interval,
        Some(Duration::from_millis(5))
    );
    assert_eq!(config.retry, TetherConfig::default().retry);
}

/// Test that load errors are reported by kind
#[test]
fn test_config_file_errors() {
    let dir = TempDir::new().unwrap();

    let missing = TetherConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(missing, TetherError::Io(_)));

    let malformed = dir.path().join("malformed.toml");
    std::fs::write(&malformed, "[retry\nmax_attempts = 3").unwrap();
    assert!(matches!(
        TetherConfig::from_file(&malformed).unwrap_err(),
        TetherError::Parse(_)
    ));

    let invalid = dir.path().join("invalid.toml");
    std::fs::write(&invalid, "[retry]\nmultiplier = 0.5").unwrap();
    let err = TetherConfig::from_file(&invalid).unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("[retry]"));
}

/// Test a toolkit built from a file enforces the configured limits
#[tokio::test(start_paused = true)]
async fn test_toolkit_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tether.toml");
    std::fs::write(
        &path,
        r#"
[breaker]
failure_threshold = 1
reset_timeout_ms = 1000

[retry]
max_attempts = 3
base_delay_ms = 100
max_delay_ms = 1000
multiplier = 2.0
jitter_fraction = 0.0

[cache]
capacity = 2
"#,
    )
    .unwrap();

    let config = TetherConfig::from_file(&path).unwrap();
    let toolkit = Toolkit::from_config(&config).unwrap();

    let start = tokio::time::Instant::now();
    let err = toolkit
        .client()
        .execute(|| async { Err::<(), _>(ResilienceError::Transient("503".to_string())) })
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::RetryExhausted { attempts: 3, .. }));
    assert_eq!(start.elapsed(), Duration::from_millis(300));

    // One exhausted call is one breaker failure, which meets the threshold
    assert_eq!(toolkit.breaker().state(), CircuitState::Open);
    tokio::time::advance(Duration::from_millis(1000)).await;

    let cache = toolkit.cache::<u32, &str>();
    let value = toolkit
        .client()
        .execute_cached(&CallContext::new(), &cache, 7, || async {
            Ok::<_, ResilienceError>("fresh")
        })
        .await
        .unwrap();
    assert_eq!(value, "fresh");
    assert_eq!(toolkit.breaker().state(), CircuitState::Closed);
    assert_eq!(cache.get(&7), Some("fresh"));
}
