//! Orchestrator error types

use ephem_doctor::{DoctorError, DoctorReport};
use ephem_store::StoreError;
use ephem_types::{ErrorKind, OperationFailure, Provider, StackState, TypesError};
use thiserror::Error;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Preflight failed for {}: {} failing check(s)", provider_label(.0), .0.count(ephem_doctor::CheckStatus::Fail))]
    PreflightFailed(Box<DoctorReport>),

    #[error("Preflight could not run: {0}")]
    Preflight(#[from] DoctorError),

    #[error("No driver registered for provider {0}")]
    NoDriver(Provider),

    #[error("Stack not found: {0}")]
    NotFound(String),

    #[error("Stack already exists: {0}")]
    AlreadyExists(String),

    /// Another operation holds the stack; retry later.
    #[error("Stack {0} is busy")]
    Busy(String),

    #[error("Stack {name} is not running (state {state})")]
    NotReady { name: String, state: StackState },

    #[error("Deploy failed: {0}")]
    DeployFailed(OperationFailure),

    #[error("Teardown of {name} incomplete: {} resource(s) failed", .failures.len())]
    TeardownIncomplete {
        name: String,
        failures: Vec<OperationFailure>,
    },

    #[error("Operation on stack {0} was cancelled")]
    Cancelled(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

fn provider_label(report: &DoctorReport) -> String {
    report
        .provider
        .map(|p| p.to_string())
        .unwrap_or_else(|| "provider".to_string())
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::InvalidRequest(_)
            | OrchestratorError::PreflightFailed(_)
            | OrchestratorError::Preflight(_)
            | OrchestratorError::NoDriver(_) => ErrorKind::Permanent,
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            OrchestratorError::Busy(_) => ErrorKind::Busy,
            OrchestratorError::NotReady { .. } => ErrorKind::NotReady,
            OrchestratorError::DeployFailed(failure) => failure.kind.into(),
            OrchestratorError::TeardownIncomplete { .. } | OrchestratorError::Cancelled(_) => {
                ErrorKind::Transient
            }
            OrchestratorError::Store(err) => err.kind(),
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => OrchestratorError::NotFound(name),
            StoreError::AlreadyExists(name) => OrchestratorError::AlreadyExists(name),
            StoreError::Conflict { name, .. } => OrchestratorError::Busy(name),
            other => OrchestratorError::Store(other),
        }
    }
}

impl From<TypesError> for OrchestratorError {
    fn from(err: TypesError) -> Self {
        OrchestratorError::InvalidRequest(err.to_string())
    }
}
