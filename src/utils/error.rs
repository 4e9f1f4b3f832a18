//! Error types for content retrieval
//!
//! These are the raw outcomes a content source reports. They are collapsed
//! into an [`ErrorClass`](crate::rotation::ErrorClass) before reaching the
//! rotation scheduler.

use thiserror::Error;

/// Errors that can occur while fetching content through a resource
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Credential or proxy rejected by the upstream
    #[error("Credential rejected with status {0}")]
    Unauthorized(u16),

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Unexpected client error status
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts exceeded")]
    MaxRetriesExceeded,

    /// Response could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Proxy could not be configured
    #[error("Invalid proxy: {0}")]
    Proxy(String),
}

impl FetchError {
    /// Error for a non-success HTTP status, `None` for success codes
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=399 => None,
            429 => Some(Self::RateLimit),
            401 | 403 => Some(Self::Unauthorized(status)),
            408 => Some(Self::Timeout),
            500..=599 => Some(Self::ServerError(status)),
            _ => Some(Self::Status(status)),
        }
    }

    /// Whether a retry on the same resource may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::ServerError(_) | Self::Timeout | Self::Decode(_) => true,
            _ => false,
        }
    }
}
