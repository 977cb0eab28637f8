//! Ephem Store - the single source of truth for stack state.
//!
//! Every stack transition is written through [`StackStore::compare_and_swap`],
//! so concurrent deploy, teardown and scheduler workers are arbitrated by the
//! store rather than by in-process locks. Teardown deadlines live in a
//! separate [`TeardownSchedule`](ephem_types::TeardownSchedule) record with its
//! own revision-based CAS; stack reads always carry the schedule's deadline.

#![deny(unsafe_code)]

mod error;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStackStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStackStore;
pub use traits::StackStore;

#[cfg(test)]
pub(crate) mod conformance;
