//! Ephem Driver - the seam between orchestration and real infrastructure.
//!
//! A [`ProvisioningDriver`] performs one forward or backward provisioning
//! action for one resource. Drivers are injected per provider through a
//! [`DriverRegistry`]; the orchestrator owns retries, backoff and timeouts.
//!
//! - [`HookDriver`] runs operator-configured commands per phase
//! - `ScriptedDriver` (feature `test-utils`) is an in-process test double

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

mod error;
pub mod hook;
mod registry;
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;
mod traits;

pub use error::{DriverError, DriverResult};
pub use hook::{HookCommands, HookDriver};
pub use registry::DriverRegistry;
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{DriverCall, ScriptedDriver};
pub use traits::{ExternalRef, ProvisioningDriver, Readiness, ResourceContext};
