//! Driver error types.

use ephem_types::{ErrorKind, FailureKind};
use thiserror::Error;

/// Result type for driver calls.
pub type DriverResult<T> = Result<T, DriverError>;

/// Failure of a single driver call, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// A retry may succeed (API throttling, network blip, timeout).
    #[error("transient: {0}")]
    Transient(String),

    /// A retry will not help (invalid configuration, missing permissions).
    #[error("permanent: {0}")]
    Permanent(String),
}

impl DriverError {
    pub fn transient(message: impl Into<String>) -> Self {
        DriverError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        DriverError::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient(_))
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            DriverError::Transient(_) => FailureKind::Transient,
            DriverError::Permanent(_) => FailureKind::Permanent,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.failure_kind().into()
    }

    pub fn message(&self) -> &str {
        match self {
            DriverError::Transient(m) | DriverError::Permanent(m) => m,
        }
    }
}
