//! Error taxonomy shared across ephem crates.
//!
//! Every component error maps onto an [`ErrorKind`] so callers can tell
//! "retry later" apart from "fix your configuration".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coarse classification of every error surfaced by ephem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    /// Another writer is mutating the same record; retry later.
    Busy,
    /// Infrastructure hiccup; a retry may succeed.
    Transient,
    /// Configuration or validation problem; retrying will not help.
    Permanent,
    InvalidDeadline,
    NotReady,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Busy | ErrorKind::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Busy => "busy",
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::InvalidDeadline => "invalid_deadline",
            ErrorKind::NotReady => "not_ready",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry classification of a failed driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl From<FailureKind> for ErrorKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Transient => ErrorKind::Transient,
            FailureKind::Permanent => ErrorKind::Permanent,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
        }
    }
}

/// Provisioning phase a resource-level operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Create,
    Ready,
    Destroy,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Create => f.write_str("create"),
            Phase::Ready => f.write_str("ready"),
            Phase::Destroy => f.write_str("destroy"),
        }
    }
}

/// A failed resource-level operation: which resource, which phase, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub resource: String,
    pub phase: Phase,
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl OperationFailure {
    pub fn new(
        resource: impl Into<String>,
        phase: Phase,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            phase,
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resource '{}' failed during {} ({}): {}",
            self.resource, self.phase, self.kind, self.message
        )
    }
}

/// Violations of data model invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    #[error("invalid stack name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("illegal state transition for stack {stack}: {from} -> {to}")]
    IllegalTransition {
        stack: String,
        from: String,
        to: String,
    },

    #[error("external ref of resource '{resource}' is already '{current}', refusing '{attempted}'")]
    ExternalRefImmutable {
        resource: String,
        current: String,
        attempted: String,
    },

    #[error("invalid resource spec: {0}")]
    InvalidResource(String),
}

impl TypesError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Permanent
    }
}
