//! Ephem Doctor - is this machine ready to provision?
//!
//! A [`Doctor`] runs an ordered list of independent [`Check`]s and collects a
//! [`DoctorReport`]. One failing check never stops the ones after it. Optional
//! checks degrade a failure to a warning.
//!
//! [`Doctor::for_provider`] builds the preset for a provider; the same report
//! gates provisioning through [`Preflight`].

#![deny(unsafe_code)]

mod check;
pub mod checks;
mod config;
mod doctor;
mod error;

pub use check::{Check, CheckOutcome, CheckResult, CheckStatus};
pub use checks::{CommandCheck, EnvVarCheck, FileCheck, HttpCheck, TcpCheck, ToolCheck};
pub use config::DoctorConfig;
pub use doctor::{Doctor, DoctorReport, Preflight, ProviderPreflight};
pub use error::{DoctorError, DoctorResult};
