//! Stack store trait

use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ephem_types::{Stack, StackName, StackState, TeardownSchedule};

/// Durable key-value store of stacks and their teardown schedules, keyed by
/// stack name.
///
/// Snapshots returned by reads carry the deadline of the schedule record in
/// `teardown_deadline`; the deadline of a snapshot handed to a write is
/// ignored.
#[async_trait]
pub trait StackStore: Send + Sync {
    /// Insert a new stack together with its schedule (deadline taken from
    /// `stack.teardown_deadline`). Fails `AlreadyExists` if the name is held
    /// by a stack not yet destroyed; a destroyed record is replaced.
    async fn create(&self, stack: &Stack) -> StoreResult<Stack>;

    /// Fetch a stack. Fails `NotFound`.
    async fn get(&self, name: &StackName) -> StoreResult<Stack>;

    /// Replace the stored stack only if its state equals `expected`.
    ///
    /// Fails `Conflict` when the stored state differs and `NotFound` when the
    /// stack does not exist. Returns the snapshot as stored.
    async fn compare_and_swap(
        &self,
        name: &StackName,
        expected: StackState,
        snapshot: &Stack,
    ) -> StoreResult<Stack>;

    /// All stacks not yet destroyed.
    async fn list_active(&self) -> StoreResult<Vec<Stack>>;

    /// Active stacks whose deadline is set and not after `now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Stack>>;

    /// Every stack, destroyed ones included.
    async fn list_all(&self) -> StoreResult<Vec<Stack>>;

    /// Fetch the teardown schedule of a stack. Fails `NotFound`.
    async fn get_schedule(&self, name: &StackName) -> StoreResult<TeardownSchedule>;

    /// Replace the deadline only if the stored revision equals
    /// `expected_revision`. Fails `Conflict` otherwise.
    async fn swap_schedule(
        &self,
        name: &StackName,
        expected_revision: u64,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<TeardownSchedule>;
}
