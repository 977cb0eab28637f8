//! Error types for ephem-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ephem_doctor::DoctorError;
use ephem_orchestrator::OrchestratorError;
use ephem_scheduler::ScheduleError;
use ephem_store::StoreError;
use ephem_types::ErrorKind;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Doctor error: {0}")]
    Doctor(#[from] DoctorError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for DaemonError {
    fn from(err: ::config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or body
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Doctor(#[from] DoctorError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_)
            | ApiError::Doctor(_)
            | ApiError::Orchestrator(OrchestratorError::InvalidRequest(_))
            | ApiError::Orchestrator(OrchestratorError::NoDriver(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR")
            }
            ApiError::Orchestrator(OrchestratorError::PreflightFailed(_))
            | ApiError::Orchestrator(OrchestratorError::Preflight(_)) => {
                (StatusCode::PRECONDITION_FAILED, "PREFLIGHT_FAILED")
            }
            ApiError::Orchestrator(OrchestratorError::DeployFailed(failure))
                if failure.kind == ephem_types::FailureKind::Permanent =>
            {
                (StatusCode::BAD_GATEWAY, "DEPLOY_FAILED")
            }
            ApiError::Schedule(ScheduleError::NotActive(_)) => (StatusCode::CONFLICT, "NOT_ACTIVE"),
            ApiError::Orchestrator(err) => status_for_kind(err.kind()),
            ApiError::Schedule(err) => status_for_kind(err.kind()),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Orchestrator(OrchestratorError::PreflightFailed(report)) => {
                serde_json::to_value(report).ok()
            }
            ApiError::Orchestrator(OrchestratorError::DeployFailed(failure)) => {
                serde_json::to_value(failure).ok()
            }
            ApiError::Orchestrator(OrchestratorError::TeardownIncomplete { failures, .. }) => {
                serde_json::to_value(failures).ok()
            }
            _ => None,
        }
    }
}

fn status_for_kind(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        ErrorKind::AlreadyExists => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
        ErrorKind::Busy => (StatusCode::CONFLICT, "BUSY"),
        ErrorKind::NotReady => (StatusCode::CONFLICT, "NOT_READY"),
        ErrorKind::InvalidDeadline => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_DEADLINE"),
        ErrorKind::Transient => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
        ErrorKind::Permanent => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, code, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
