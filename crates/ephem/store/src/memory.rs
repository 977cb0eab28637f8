//! In-memory stack store for development and testing.
//!
//! State is lost when the process exits.

use crate::error::{StoreError, StoreResult};
use crate::traits::StackStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ephem_types::{Stack, StackName, StackState, TeardownSchedule};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredStack {
    stack: Stack,
    schedule: TeardownSchedule,
}

impl StoredStack {
    /// The stack as handed out to readers, carrying the schedule's deadline.
    fn snapshot(&self) -> Stack {
        let mut stack = self.stack.clone();
        stack.teardown_deadline = self.schedule.deadline;
        stack
    }
}

/// DashMap-backed stack store. Stack and schedule share one entry, so every
/// operation on a name is atomic under the entry's shard lock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStackStore {
    stacks: Arc<DashMap<StackName, StoredStack>>,
}

impl InMemoryStackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    fn collect(&self, keep: impl Fn(&Stack) -> bool) -> Vec<Stack> {
        let mut stacks: Vec<Stack> = self
            .stacks
            .iter()
            .map(|entry| entry.value().snapshot())
            .filter(|stack| keep(stack))
            .collect();
        stacks.sort_by(|a, b| a.name.cmp(&b.name));
        stacks
    }
}

#[async_trait]
impl StackStore for InMemoryStackStore {
    async fn create(&self, stack: &Stack) -> StoreResult<Stack> {
        match self.stacks.entry(stack.name.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().stack.state != StackState::Destroyed {
                    return Err(StoreError::AlreadyExists(stack.name.to_string()));
                }
                // Reuse of a destroyed name; the revision keeps counting so
                // stale schedule writes from the old stack still conflict
                let schedule = occupied
                    .get()
                    .schedule
                    .updated(stack.teardown_deadline, stack.created_at);
                let stored = StoredStack {
                    stack: stack.clone(),
                    schedule,
                };
                let snapshot = stored.snapshot();
                occupied.insert(stored);
                Ok(snapshot)
            }
            Entry::Vacant(vacant) => {
                let stored = StoredStack {
                    stack: stack.clone(),
                    schedule: TeardownSchedule::new(
                        stack.name.clone(),
                        stack.teardown_deadline,
                        stack.created_at,
                    ),
                };
                let snapshot = stored.snapshot();
                vacant.insert(stored);
                Ok(snapshot)
            }
        }
    }

    async fn get(&self, name: &StackName) -> StoreResult<Stack> {
        self.stacks
            .get(name)
            .map(|entry| entry.snapshot())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn compare_and_swap(
        &self,
        name: &StackName,
        expected: StackState,
        snapshot: &Stack,
    ) -> StoreResult<Stack> {
        if snapshot.name != *name {
            return Err(StoreError::InvalidData(format!(
                "snapshot for {} written under {}",
                snapshot.name, name
            )));
        }

        let mut entry = self
            .stacks
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if entry.stack.state != expected {
            return Err(StoreError::conflict(
                name.as_str(),
                format!("expected state {}, found {}", expected, entry.stack.state),
            ));
        }
        entry.stack = snapshot.clone();
        Ok(entry.snapshot())
    }

    async fn list_active(&self) -> StoreResult<Vec<Stack>> {
        Ok(self.collect(|stack| stack.state.is_active()))
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<Stack>> {
        Ok(self.collect(|stack| stack.is_expired(now)))
    }

    async fn list_all(&self) -> StoreResult<Vec<Stack>> {
        Ok(self.collect(|_| true))
    }

    async fn get_schedule(&self, name: &StackName) -> StoreResult<TeardownSchedule> {
        self.stacks
            .get(name)
            .map(|entry| entry.schedule.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn swap_schedule(
        &self,
        name: &StackName,
        expected_revision: u64,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<TeardownSchedule> {
        let mut entry = self
            .stacks
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if entry.schedule.revision != expected_revision {
            return Err(StoreError::conflict(
                name.as_str(),
                format!(
                    "expected schedule revision {}, found {}",
                    expected_revision, entry.schedule.revision
                ),
            ));
        }
        entry.schedule = entry.schedule.updated(deadline, now);
        Ok(entry.schedule.clone())
    }
}
