//! Scheduler error types

use ephem_store::StoreError;
use ephem_types::ErrorKind;
use thiserror::Error;

pub type ScheduleResult<T> = Result<T, ScheduleError>;

#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    #[error("Stack not found: {0}")]
    NotFound(String),

    /// Deadlines must lie strictly in the future.
    #[error("Invalid deadline: {0}")]
    InvalidDeadline(String),

    #[error("Stack {0} is destroyed")]
    NotActive(String),

    #[error("Schedule of stack {0} changed concurrently")]
    Busy(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScheduleError::NotFound(_) => ErrorKind::NotFound,
            ScheduleError::InvalidDeadline(_) => ErrorKind::InvalidDeadline,
            ScheduleError::NotActive(_) => ErrorKind::Permanent,
            ScheduleError::Busy(_) => ErrorKind::Busy,
            ScheduleError::Store(err) => err.kind(),
        }
    }
}

impl From<StoreError> for ScheduleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => ScheduleError::NotFound(name),
            StoreError::Conflict { name, .. } => ScheduleError::Busy(name),
            other => ScheduleError::Store(other),
        }
    }
}
