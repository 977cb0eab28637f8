//! Doctor error types

use ephem_types::ErrorKind;
use thiserror::Error;

pub type DoctorResult<T> = Result<T, DoctorError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DoctorError {
    #[error("Invalid version requirement '{value}': {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),
}

impl DoctorError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Permanent
    }
}
