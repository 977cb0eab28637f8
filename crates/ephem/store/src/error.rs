//! Store error types

use ephem_types::ErrorKind;
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by stack store backends
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No record for this stack name
    #[error("Stack not found: {0}")]
    NotFound(String),

    /// A stack with this name already exists
    #[error("Stack already exists: {0}")]
    AlreadyExists(String),

    /// The record changed under the caller's feet
    #[error("Conflict on stack {name}: {reason}")]
    Conflict { name: String, reason: String },

    /// Stored or submitted data is malformed
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Backend unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend query failed
    #[error("Query error: {0}")]
    Query(String),
}

impl StoreError {
    pub fn conflict(name: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::Conflict {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::Conflict { .. } => ErrorKind::Busy,
            StoreError::InvalidData(_) => ErrorKind::Permanent,
            StoreError::Connection(_) | StoreError::Query(_) => ErrorKind::Transient,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
