//! Teardown schedule records.

use crate::ids::StackName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutable deadline policy attached to a stack.
///
/// Stored apart from the stack record so a deadline can change while the
/// stack itself is mid-provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownSchedule {
    pub stack_name: StackName,

    /// `None` means the stack is never torn down automatically.
    pub deadline: Option<DateTime<Utc>>,

    pub last_modified_at: DateTime<Utc>,

    /// Bumped on every write; the compare-and-swap token for this record.
    pub revision: u64,
}

impl TeardownSchedule {
    pub fn new(stack_name: StackName, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            stack_name,
            deadline,
            last_modified_at: now,
            revision: 0,
        }
    }

    /// The record that replaces `self` when the deadline changes.
    pub fn updated(&self, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            stack_name: self.stack_name.clone(),
            deadline,
            last_modified_at: now,
            revision: self.revision + 1,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_update_bumps_revision() {
        let now = Utc::now();
        let schedule = TeardownSchedule::new(StackName::new("demo").unwrap(), None, now);
        let later = now + Duration::hours(1);

        let updated = schedule.updated(Some(later), now);
        assert_eq!(updated.revision, 1);
        assert_eq!(updated.deadline, Some(later));
        assert!(!updated.is_due(now));
        assert!(updated.is_due(later));

        let cancelled = updated.updated(None, now);
        assert_eq!(cancelled.revision, 2);
        assert!(!cancelled.is_due(later + Duration::days(365)));
    }
}
