//! Stack records and the stack lifecycle state machine.

use crate::error::{OperationFailure, TypesError};
use crate::ids::{Provider, StackName};
use crate::resource::{Resource, ResourceSpec, ResourceState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Logical service name -> reachable endpoint URL.
pub type ServiceUrls = BTreeMap<String, String>;

/// Lifecycle state of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackState {
    Planned,
    Provisioning,
    Running,
    TearingDown,
    Destroyed,
    Failed,
}

impl StackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackState::Planned => "planned",
            StackState::Provisioning => "provisioning",
            StackState::Running => "running",
            StackState::TearingDown => "tearing_down",
            StackState::Destroyed => "destroyed",
            StackState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(StackState::Planned),
            "provisioning" => Some(StackState::Provisioning),
            "running" => Some(StackState::Running),
            "tearing_down" => Some(StackState::TearingDown),
            "destroyed" => Some(StackState::Destroyed),
            "failed" => Some(StackState::Failed),
            _ => None,
        }
    }

    /// Position along the forward lifecycle. `Failed` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            StackState::Planned => Some(0),
            StackState::Provisioning => Some(1),
            StackState::Running => Some(2),
            StackState::TearingDown => Some(3),
            StackState::Destroyed => Some(4),
            StackState::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StackState::Destroyed)
    }

    /// Active stacks are every stack not yet destroyed.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether a write moving a stack from `self` to `next` is legal.
    ///
    /// Forward moves along Planned -> Provisioning -> Running -> TearingDown ->
    /// Destroyed are allowed, including skips. Same-state writes record
    /// progress. `Failed` is reachable from any non-terminal state and only
    /// leaves through the teardown path.
    pub fn can_transition_to(&self, next: StackState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (None, Some(_)) => next == StackState::TearingDown,
            (Some(from), Some(to)) => {
                to > from && (next != StackState::Destroyed || *self == StackState::TearingDown)
            }
        }
    }
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, provider-bound set of resources deployed and torn down as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub name: StackName,
    pub provider: Provider,

    /// Provisioning dependency order; teardown walks it in reverse.
    pub resources: Vec<Resource>,

    pub state: StackState,
    pub created_at: DateTime<Utc>,

    /// Mirrors the stack's teardown schedule record. `None` means the stack
    /// is never torn down automatically.
    pub teardown_deadline: Option<DateTime<Utc>>,

    pub last_transition_at: DateTime<Utc>,

    /// Populated only while the stack is running.
    #[serde(default)]
    pub service_urls: ServiceUrls,

    /// Accumulated resource-level failures (deploy, cleanup and teardown).
    #[serde(default)]
    pub errors: Vec<OperationFailure>,
}

impl Stack {
    /// Build a freshly planned stack.
    pub fn planned(
        name: StackName,
        provider: Provider,
        specs: Vec<ResourceSpec>,
        teardown_deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, TypesError> {
        let mut seen = std::collections::HashSet::new();
        for spec in &specs {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(TypesError::InvalidResource(format!(
                    "duplicate resource name '{}'",
                    spec.name
                )));
            }
        }
        if specs.is_empty() {
            return Err(TypesError::InvalidResource(
                "a stack needs at least one resource".to_string(),
            ));
        }

        Ok(Self {
            name,
            provider,
            resources: specs.into_iter().map(Resource::from_spec).collect(),
            state: StackState::Planned,
            created_at: now,
            teardown_deadline,
            last_transition_at: now,
            service_urls: ServiceUrls::new(),
            errors: Vec::new(),
        })
    }

    /// Move to `next`, enforcing the lifecycle rules.
    ///
    /// Service URLs are dropped whenever the stack is not running.
    pub fn transition(&mut self, next: StackState, now: DateTime<Utc>) -> Result<(), TypesError> {
        if !self.state.can_transition_to(next) {
            return Err(TypesError::IllegalTransition {
                stack: self.name.to_string(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if self.state != next {
            self.last_transition_at = now;
        }
        self.state = next;
        if next != StackState::Running {
            self.service_urls.clear();
        }
        Ok(())
    }

    /// Service URLs derived from the endpoints of exposed, ready resources.
    pub fn collect_service_urls(&self) -> ServiceUrls {
        self.resources
            .iter()
            .filter(|r| r.spec.expose && r.state == ResourceState::Ready)
            .filter_map(|r| {
                r.endpoint
                    .as_ref()
                    .map(|endpoint| (r.name().to_string(), endpoint.clone()))
            })
            .collect()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_active() && self.teardown_deadline.is_some_and(|deadline| deadline <= now)
    }

    pub fn record_failure(&mut self, failure: OperationFailure) {
        self.errors.push(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    const ALL_STATES: [StackState; 6] = [
        StackState::Planned,
        StackState::Provisioning,
        StackState::Running,
        StackState::TearingDown,
        StackState::Destroyed,
        StackState::Failed,
    ];

    fn demo_stack() -> Stack {
        Stack::planned(
            StackName::new("demo").unwrap(),
            Provider::LocalCluster,
            vec![
                ResourceSpec::new("db", "postgres"),
                ResourceSpec::new("api", "mlflow-server").exposed(),
            ],
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut stack = demo_stack();
        let now = Utc::now();
        stack.transition(StackState::Provisioning, now).unwrap();
        stack.transition(StackState::Running, now).unwrap();
        stack.transition(StackState::TearingDown, now).unwrap();
        stack.transition(StackState::Destroyed, now).unwrap();
        assert!(stack.state.is_terminal());
        assert!(stack.transition(StackState::Failed, now).is_err());
    }

    #[test]
    fn test_failed_only_exits_through_teardown() {
        let mut stack = demo_stack();
        let now = Utc::now();
        stack.transition(StackState::Provisioning, now).unwrap();
        stack.transition(StackState::Failed, now).unwrap();
        assert!(stack.clone().transition(StackState::Running, now).is_err());
        assert!(stack.clone().transition(StackState::Provisioning, now).is_err());
        assert!(stack.clone().transition(StackState::Destroyed, now).is_err());
        stack.transition(StackState::TearingDown, now).unwrap();
    }

    #[test]
    fn test_destroyed_only_from_tearing_down() {
        assert!(!StackState::Running.can_transition_to(StackState::Destroyed));
        assert!(!StackState::Planned.can_transition_to(StackState::Destroyed));
        assert!(StackState::TearingDown.can_transition_to(StackState::Destroyed));
    }

    #[test]
    fn test_service_urls_cleared_when_leaving_running() {
        let mut stack = demo_stack();
        let now = Utc::now();
        stack.transition(StackState::Provisioning, now).unwrap();
        stack.transition(StackState::Running, now).unwrap();
        stack
            .service_urls
            .insert("api".to_string(), "http://127.0.0.1:30080".to_string());

        stack.transition(StackState::TearingDown, now).unwrap();
        assert!(stack.service_urls.is_empty());
    }

    #[test]
    fn test_collect_service_urls_only_exposed_ready() {
        let mut stack = demo_stack();
        for resource in &mut stack.resources {
            resource.state = ResourceState::Ready;
            resource.endpoint = Some(format!("http://{}.local", resource.name()));
        }
        let urls = stack.collect_service_urls();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls.get("api").map(String::as_str), Some("http://api.local"));
    }

    #[test]
    fn test_planned_rejects_duplicates_and_empty() {
        let name = StackName::new("dup").unwrap();
        let dup = Stack::planned(
            name.clone(),
            Provider::Gcp,
            vec![ResourceSpec::new("db", "postgres"), ResourceSpec::new("db", "bucket")],
            None,
            Utc::now(),
        );
        assert!(dup.is_err());
        assert!(Stack::planned(name, Provider::Gcp, vec![], None, Utc::now()).is_err());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut stack = demo_stack();
        assert!(!stack.is_expired(now));
        stack.teardown_deadline = Some(now - Duration::seconds(1));
        assert!(stack.is_expired(now));
        stack.state = StackState::Destroyed;
        assert!(!stack.is_expired(now));
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in ALL_STATES {
            assert_eq!(StackState::parse(state.as_str()), Some(state));
        }
    }

    proptest! {
        // Whatever sequence of transitions is attempted, accepted moves never
        // go backwards along the lifecycle and nothing escapes Destroyed.
        #[test]
        fn prop_accepted_transitions_are_monotonic(steps in proptest::collection::vec(0usize..6, 1..24)) {
            let mut stack = demo_stack();
            let now = Utc::now();
            for step in steps {
                let before = stack.state;
                let next = ALL_STATES[step];
                if stack.transition(next, now).is_ok() {
                    prop_assert!(before != StackState::Destroyed);
                    if before == StackState::Failed && next != StackState::Failed {
                        prop_assert_eq!(next, StackState::TearingDown);
                    }
                    if let (Some(a), Some(b)) = (before.rank(), next.rank()) {
                        prop_assert!(b >= a);
                    }
                    if next != StackState::Running {
                        prop_assert!(stack.service_urls.is_empty());
                    }
                }
            }
        }
    }
}
