//! Error types for the rotation module

use std::fmt;
use std::path::Path;

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;

/// Rotation-specific errors
///
/// Operational conditions (rate limits, rejected credentials, timeouts) are
/// never errors here; they reach the scheduler as an
/// [`ErrorClass`](super::classify::ErrorClass). Only configuration and
/// persistence problems are raised.
#[derive(Debug)]
pub enum RotationError {
    /// Missing, malformed or empty pool definition
    Configuration {
        reason: String,
    },

    /// State store could not be read or written
    Persistence {
        operation: String,
        reason: String,
    },

    /// A resource id that is not part of the pool
    UnknownResource {
        id: String,
    },

    /// Every resource in the pool has been invalidated
    PoolExhausted {
        pool_size: usize,
    },
}

impl fmt::Display for RotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => {
                write!(f, "Configuration error: {}", reason)
            }
            Self::Persistence { operation, reason } => {
                write!(f, "Persistence error during '{}': {}", operation, reason)
            }
            Self::UnknownResource { id } => {
                write!(f, "Unknown resource '{}'", id)
            }
            Self::PoolExhausted { pool_size } => {
                write!(
                    f,
                    "All {} resources are invalidated and need external remediation",
                    pool_size
                )
            }
        }
    }
}

impl std::error::Error for RotationError {}

impl From<serde_json::Error> for RotationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence {
            operation: "serialize".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for RotationError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl RotationError {
    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error for an I/O failure on a path
    pub fn io(operation: &str, path: &Path, err: std::io::Error) -> Self {
        Self::Persistence {
            operation: operation.to_string(),
            reason: format!("{}: {}", path.display(), err),
        }
    }

    /// Create an unknown resource error
    pub fn unknown_resource(id: impl Into<String>) -> Self {
        Self::UnknownResource { id: id.into() }
    }

    /// Whether this is a configuration error (fatal at startup)
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Whether this is a persistence error
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }

    /// Check if the error is recoverable
    ///
    /// Persistence failures leave the in-memory state intact, so the run can
    /// continue; everything else needs operator action.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error() {
        let err = RotationError::configuration("pool is empty");
        assert!(err.to_string().contains("pool is empty"));
        assert!(err.is_configuration());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_persistence_error() {
        let err = RotationError::persistence("save", "disk full");
        assert!(err.to_string().contains("save"));
        assert!(err.to_string().contains("disk full"));
        assert!(err.is_persistence());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_pool_exhausted_error() {
        let err = RotationError::PoolExhausted { pool_size: 3 };
        assert!(err.to_string().contains('3'));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: RotationError = io_err.into();
        assert!(matches!(err, RotationError::Persistence { .. }));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: RotationError = json_err.into();
        assert!(err.is_persistence());
    }
}
