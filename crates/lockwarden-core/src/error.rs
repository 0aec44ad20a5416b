//! Error types for Lockwarden

use thiserror::Error;

use crate::locking::LockError;

/// Result type alias using Lockwarden's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Lockwarden error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lock(e) => e.code(),
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Lock(e) => e.suggestion(),
            Self::ConfigError(_) => Some("lockwarden config list".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::LockRecord;
    use std::time::Duration;

    #[test]
    fn test_lock_error_code_passes_through() {
        let error: Error = LockError::Timeout {
            resource: "orders".to_string(),
            requester: "worker-2".to_string(),
            timeout: Duration::from_millis(250),
            current: Box::new(LockRecord::free("orders")),
        }
        .into();

        assert_eq!(error.code(), "E300");
        assert!(error.suggestion().is_some());
        assert!(error.to_string().contains("orders"));
    }

    #[test]
    fn test_config_error() {
        let error = Error::ConfigError("bad interval".to_string());
        assert_eq!(error.code(), "E600");
        assert_eq!(error.suggestion(), Some("lockwarden config list".to_string()));
        assert!(error.to_string().contains("bad interval"));
    }

    #[test]
    fn test_invalid_input_error() {
        let error = Error::InvalidInput("empty resource".to_string());
        assert_eq!(error.code(), "E800");
        assert_eq!(error.suggestion(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: Error = io.into();
        assert_eq!(error.code(), "E9999");
    }

    #[test]
    fn test_invalid_lock_config_points_at_config_list() {
        let error: Error = LockError::InvalidConfig("event capacity".to_string()).into();
        assert_eq!(error.code(), "E304");
        assert_eq!(error.suggestion(), Some("lockwarden config list".to_string()));
    }
}
