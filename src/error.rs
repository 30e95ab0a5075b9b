/*!
 * Error types for Tether
 */

use tether_core_resilience::ResilienceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TetherError>;

#[derive(Debug, Error)]
pub enum TetherError {
    /// Configuration value rejected during validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error reading or writing a config or log file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TOML
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Error raised by a resilience primitive
    #[error(transparent)]
    Resilience(#[from] ResilienceError),
}

impl TetherError {
    /// Check if this error came from configuration loading or validation
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TetherError::Config(_)
                | TetherError::Parse(_)
                | TetherError::Resilience(ResilienceError::InvalidConfig(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TetherError::Config("retry.max_attempts must be >= 1".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: retry.max_attempts must be >= 1"
        );

        let err = TetherError::from(ResilienceError::CircuitOpen);
        assert_eq!(err.to_string(), ResilienceError::CircuitOpen.to_string());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(TetherError::Config("bad".to_string()).is_config_error());
        assert!(
            TetherError::from(ResilienceError::InvalidConfig("bad".to_string())).is_config_error()
        );
        assert!(!TetherError::from(ResilienceError::PoolClosed).is_config_error());

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(!TetherError::from(io).is_config_error());
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: TetherError = toml::from_str::<toml::Value>("not = [valid")
            .unwrap_err()
            .into();
        assert!(matches!(err, TetherError::Parse(_)));
        assert!(err.is_config_error());
    }
}
