//! Collapse upstream failures into the three classes the scheduler acts on

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::error::FetchError;

/// Resource-level failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Provider throttling: extended cooldown, retry on another resource
    RateLimited,
    /// Credential rejected: excluded until externally remediated
    ResourceInvalid,
    /// Timeout or server error: short cooldown, retry permitted
    Transient,
}

impl ErrorClass {
    /// Whether the same resource may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::ResourceInvalid => write!(f, "resource_invalid"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// Map an HTTP status to a class, `None` for success codes
pub fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        200..=399 => None,
        429 => Some(ErrorClass::RateLimited),
        401 | 403 => Some(ErrorClass::ResourceInvalid),
        _ => Some(ErrorClass::Transient),
    }
}

/// Anything that can be classified at the fetch boundary
///
/// Unrecognized failures are transient.
pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

impl Classify for FetchError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::RateLimit => ErrorClass::RateLimited,
            Self::Unauthorized(_) => ErrorClass::ResourceInvalid,
            Self::Http(e) => e
                .status()
                .and_then(|s| classify_status(s.as_u16()))
                .unwrap_or(ErrorClass::Transient),
            Self::ServerError(_)
            | Self::Status(_)
            | Self::Timeout
            | Self::MaxRetriesExceeded
            | Self::Decode(_)
            | Self::InvalidUrl(_)
            | Self::Proxy(_) => ErrorClass::Transient,
        }
    }
}

impl Classify for anyhow::Error {
    fn classify(&self) -> ErrorClass {
        match self.downcast_ref::<FetchError>() {
            Some(fetch) => fetch.classify(),
            None => ErrorClass::Transient,
        }
    }
}
