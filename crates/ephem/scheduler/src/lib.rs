//! Ephem Scheduler - makes sure nothing outlives its deadline.
//!
//! [`TeardownScheduler`] periodically lists expired stacks and tears them down
//! with bounded concurrency. Expiry is a standing condition, so a failed or
//! contended teardown is simply picked up again on the next tick.
//! [`TeardownSchedules`] is the operator-facing view of deadlines.

#![deny(unsafe_code)]

mod error;
mod scheduler;
mod schedules;

pub use error::{ScheduleError, ScheduleResult};
pub use scheduler::{SchedulerConfig, SweepReport, TeardownScheduler};
pub use schedules::{TeardownSchedules, TeardownStatus};
