//! Ephem Orchestrator - turns a stack declaration into running resources and
//! back into nothing.
//!
//! The [`Orchestrator`] owns the retry policy and sequencing; drivers do single
//! short calls and the store arbitrates concurrent writers. Every state change
//! is a compare-and-swap, so a deploy and a teardown racing on the same stack
//! never both win.

#![deny(unsafe_code)]

mod error;
mod orchestrator;
mod request;
pub mod retry;

pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::Orchestrator;
pub use request::{DeployRequest, TeardownReport};
pub use retry::{RetryError, RetryPolicy, Step};

pub use tokio_util::sync::CancellationToken;
