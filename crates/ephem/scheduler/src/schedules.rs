//! Operator view of teardown deadlines

use crate::error::{ScheduleError, ScheduleResult};
use chrono::{DateTime, Utc};
use ephem_store::StackStore;
use ephem_types::{StackName, StackState, TeardownSchedule};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Current teardown status of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownStatus {
    pub stack_name: StackName,
    pub state: StackState,
    pub deadline: Option<DateTime<Utc>>,
    pub last_modified_at: DateTime<Utc>,
    /// Seconds until the deadline, zero once it has passed
    pub remaining_secs: Option<i64>,
}

/// Reads and edits the deadlines of live stacks.
#[derive(Clone)]
pub struct TeardownSchedules {
    store: Arc<dyn StackStore>,
}

impl TeardownSchedules {
    pub fn new(store: Arc<dyn StackStore>) -> Self {
        Self { store }
    }

    pub async fn get_teardown_status(&self, name: &StackName) -> ScheduleResult<TeardownStatus> {
        let stack = self.store.get(name).await?;
        let schedule = self.store.get_schedule(name).await?;
        let now = Utc::now();

        Ok(TeardownStatus {
            stack_name: stack.name,
            state: stack.state,
            deadline: schedule.deadline,
            last_modified_at: schedule.last_modified_at,
            remaining_secs: schedule
                .deadline
                .map(|deadline| (deadline - now).num_seconds().max(0)),
        })
    }

    /// Replace the deadline. `None` disables automatic teardown.
    pub async fn update_teardown_schedule(
        &self,
        name: &StackName,
        deadline: Option<DateTime<Utc>>,
    ) -> ScheduleResult<TeardownSchedule> {
        let now = Utc::now();
        if let Some(deadline) = deadline {
            if deadline <= now {
                return Err(ScheduleError::InvalidDeadline(format!(
                    "{} is not in the future",
                    deadline.to_rfc3339()
                )));
            }
        }

        let current = self.active_schedule(name).await?;
        let updated = self
            .store
            .swap_schedule(name, current.revision, deadline, now)
            .await?;
        info!(stack = %name, deadline = ?updated.deadline, revision = updated.revision, "Teardown schedule updated");
        Ok(updated)
    }

    pub async fn cancel_teardown(&self, name: &StackName) -> ScheduleResult<TeardownSchedule> {
        self.update_teardown_schedule(name, None).await
    }

    /// Push the deadline `by` further out, counting from now when the
    /// deadline has already passed or is unset.
    pub async fn extend_teardown(
        &self,
        name: &StackName,
        by: Duration,
    ) -> ScheduleResult<TeardownSchedule> {
        let by = chrono::Duration::from_std(by)
            .ok()
            .filter(|by| *by > chrono::Duration::zero())
            .ok_or_else(|| ScheduleError::InvalidDeadline("extension must be positive".to_string()))?;

        let now = Utc::now();
        let current = self.active_schedule(name).await?;
        let base = current.deadline.map_or(now, |deadline| deadline.max(now));
        let deadline = base
            .checked_add_signed(by)
            .ok_or_else(|| ScheduleError::InvalidDeadline("extension out of range".to_string()))?;
        let updated = self
            .store
            .swap_schedule(name, current.revision, Some(deadline), now)
            .await?;
        info!(stack = %name, deadline = ?updated.deadline, "Teardown extended");
        Ok(updated)
    }

    async fn active_schedule(&self, name: &StackName) -> ScheduleResult<TeardownSchedule> {
        let stack = self.store.get(name).await?;
        if stack.state == StackState::Destroyed {
            return Err(ScheduleError::NotActive(name.to_string()));
        }
        Ok(self.store.get_schedule(name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use ephem_store::InMemoryStackStore;
    use ephem_types::{Provider, ResourceSpec, Stack};

    async fn seeded(deadline: Option<DateTime<Utc>>) -> (TeardownSchedules, Arc<InMemoryStackStore>, StackName) {
        let store = Arc::new(InMemoryStackStore::new());
        let name = StackName::new("demo").unwrap();
        let stack = Stack::planned(
            name.clone(),
            Provider::LocalCluster,
            vec![ResourceSpec::new("db", "postgres")],
            deadline,
            Utc::now(),
        )
        .unwrap();
        store.create(&stack).await.unwrap();
        (TeardownSchedules::new(store.clone()), store, name)
    }

    #[tokio::test]
    async fn test_past_deadline_rejected_and_unchanged() {
        let original = Utc::now() + ChronoDuration::hours(1);
        let (schedules, store, name) = seeded(Some(original)).await;

        let err = schedules
            .update_teardown_schedule(&name, Some(Utc::now() - ChronoDuration::seconds(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidDeadline(_)));
        assert_eq!(err.kind(), ephem_types::ErrorKind::InvalidDeadline);

        let schedule = store.get_schedule(&name).await.unwrap();
        assert_eq!(schedule.deadline, Some(original));
        assert_eq!(schedule.revision, 0);
    }

    #[tokio::test]
    async fn test_cancel_removes_from_expired() {
        let (schedules, store, name) = seeded(Some(Utc::now() + ChronoDuration::minutes(5))).await;
        let later = Utc::now() + ChronoDuration::hours(1);
        assert_eq!(store.list_expired(later).await.unwrap().len(), 1);

        let schedule = schedules.cancel_teardown(&name).await.unwrap();
        assert!(schedule.deadline.is_none());
        assert!(store.list_expired(later).await.unwrap().is_empty());

        let status = schedules.get_teardown_status(&name).await.unwrap();
        assert!(status.deadline.is_none());
        assert!(status.remaining_secs.is_none());
    }

    #[tokio::test]
    async fn test_extend_counts_from_deadline_or_now() {
        let deadline = Utc::now() + ChronoDuration::hours(1);
        let (schedules, _, name) = seeded(Some(deadline)).await;

        let extended = schedules
            .extend_teardown(&name, Duration::from_secs(1800))
            .await
            .unwrap();
        assert_eq!(extended.deadline, Some(deadline + ChronoDuration::minutes(30)));

        schedules.cancel_teardown(&name).await.unwrap();
        let before = Utc::now();
        let extended = schedules
            .extend_teardown(&name, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(extended.deadline.unwrap() >= before + ChronoDuration::seconds(60));
        assert_eq!(extended.revision, 3);

        let err = schedules.extend_teardown(&name, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidDeadline(_)));
    }

    #[tokio::test]
    async fn test_unrepresentable_extension_rejected_and_unchanged() {
        let deadline = Utc::now() + ChronoDuration::hours(1);
        let (schedules, store, name) = seeded(Some(deadline)).await;

        let err = schedules
            .extend_teardown(&name, Duration::from_secs(10_000_000_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidDeadline(_)));

        let schedule = store.get_schedule(&name).await.unwrap();
        assert_eq!(schedule.deadline, Some(deadline));
        assert_eq!(schedule.revision, 0);
    }

    #[tokio::test]
    async fn test_status_reports_remaining_time() {
        let (schedules, _, name) = seeded(Some(Utc::now() + ChronoDuration::hours(2))).await;
        let status = schedules.get_teardown_status(&name).await.unwrap();
        assert_eq!(status.state, StackState::Planned);
        let remaining = status.remaining_secs.unwrap();
        assert!(remaining > 7000 && remaining <= 7200);
    }

    #[tokio::test]
    async fn test_destroyed_and_missing_stacks() {
        let (schedules, store, name) = seeded(None).await;
        let mut stack = store.get(&name).await.unwrap();
        stack.transition(StackState::TearingDown, Utc::now()).unwrap();
        store.compare_and_swap(&name, StackState::Planned, &stack).await.unwrap();
        stack.transition(StackState::Destroyed, Utc::now()).unwrap();
        store.compare_and_swap(&name, StackState::TearingDown, &stack).await.unwrap();

        let err = schedules
            .update_teardown_schedule(&name, Some(Utc::now() + ChronoDuration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ScheduleError::NotActive(_)));

        let missing = StackName::new("missing").unwrap();
        let err = schedules.cancel_teardown(&missing).await.unwrap_err();
        assert!(matches!(err, ScheduleError::NotFound(_)));
    }
}
