//! Deploy requests and teardown reports

use ephem_types::{Provider, ResourceSpec, StackName, StackState};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stack to provision: resources in dependency order plus an optional TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub name: StackName,
    pub provider: Provider,
    pub resources: Vec<ResourceSpec>,
    /// `None` disables automatic teardown.
    pub ttl: Option<Duration>,
}

impl DeployRequest {
    pub fn new(name: StackName, provider: Provider, resources: Vec<ResourceSpec>) -> Self {
        Self {
            name,
            provider,
            resources,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.resources.is_empty() {
            return Err("a stack needs at least one resource".to_string());
        }
        if self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err("ttl must be positive".to_string());
        }
        Ok(())
    }
}

/// Result of a teardown that reached `Destroyed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    pub stack_name: StackName,
    pub state: StackState,

    /// Resources destroyed by this call, in teardown order.
    pub destroyed: Vec<String>,

    /// The stack was already destroyed; nothing was done.
    pub already_destroyed: bool,
}
