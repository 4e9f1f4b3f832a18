//! Unified error handling for the harvester crate
//!
//! Consolidates the domain errors into a single `Error` enum while keeping
//! the domain types usable on their own.
//!
//! # Architecture
//!
//! - [`HarvesterErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvester::error::{Error, HarvesterErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying ({}): {err}", err.category());
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

pub use crate::rotation::{RotationError, RotationResult};
pub use crate::utils::error::FetchError;

use crate::rotation::{Classify, ErrorClass};

/// Common trait for harvester error types
pub trait HarvesterErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, rate limit)
    Network,
    /// Response decoding errors
    Parsing,
    /// State files, pool files and other I/O
    Storage,
    /// Configuration and validation errors
    Config,
    /// Resource rotation errors
    Rotation,
    /// Other/unknown errors
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Rotation => "rotation",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

impl HarvesterErrorTrait for RotationError {
    fn is_recoverable(&self) -> bool {
        RotationError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Config,
            Self::Persistence { .. } => ErrorCategory::Storage,
            Self::UnknownResource { .. } | Self::PoolExhausted { .. } => ErrorCategory::Rotation,
        }
    }
}

impl HarvesterErrorTrait for FetchError {
    fn is_recoverable(&self) -> bool {
        // Anything but a dead credential can succeed on another resource
        self.classify() != ErrorClass::ResourceInvalid
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) => ErrorCategory::Parsing,
            Self::InvalidUrl(_) | Self::Proxy(_) => ErrorCategory::Config,
            _ => ErrorCategory::Network,
        }
    }
}

/// Unified error type for the harvester crate
#[derive(Error, Debug)]
pub enum Error {
    /// Rotation scheduler, pool and state store errors
    #[error("Rotation error: {0}")]
    Rotation(#[from] RotationError),

    /// Content retrieval errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HarvesterErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Rotation(e) => HarvesterErrorTrait::is_recoverable(e),
            Self::Fetch(e) => HarvesterErrorTrait::is_recoverable(e),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Rotation(e) => e.category(),
            Self::Fetch(e) => e.category(),
            Self::Http(_) => ErrorCategory::Network,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Config(format!("{err:#}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
