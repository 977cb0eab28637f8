//! Ephem Types - core data model for ephemeral stack orchestration
//!
//! Ephem provisions short-lived ML infrastructure stacks (a tracking server
//! plus its storage backend, say) and guarantees they are torn down once
//! their lifetime runs out.
//!
//! ## Key Concepts
//!
//! - **Stack**: a named set of resources deployed and destroyed as a unit
//! - **Resource**: one infrastructure unit owned by a stack
//! - **TeardownSchedule**: the deadline policy attached to a stack
//! - **ErrorKind**: the error taxonomy shared by every component

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod ids;
pub mod resource;
pub mod schedule;
pub mod stack;

pub use error::{ErrorKind, FailureKind, OperationFailure, Phase, TypesError};
pub use ids::{Provider, StackName};
pub use resource::{Resource, ResourceSpec, ResourceState};
pub use schedule::TeardownSchedule;
pub use stack::{ServiceUrls, Stack, StackState};
