//! Provisioning driver trait

use crate::error::DriverResult;
use async_trait::async_trait;
use ephem_types::{Provider, Resource, StackName};
use serde::{Deserialize, Serialize};

/// Provider-assigned identifier returned by a successful create.
pub type ExternalRef = String;

/// Everything a driver needs to act on one resource.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    pub stack_name: StackName,
    pub provider: Provider,
    pub resource: Resource,

    /// Stable tag for the external object; the basis of idempotent create
    /// and destroy.
    pub deterministic_id: String,
}

impl ResourceContext {
    pub fn new(stack_name: StackName, provider: Provider, resource: Resource) -> Self {
        let deterministic_id = resource.deterministic_id(&stack_name);
        Self {
            stack_name,
            provider,
            resource,
            deterministic_id,
        }
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn kind(&self) -> &str {
        self.resource.kind()
    }

    pub fn external_ref(&self) -> Option<&str> {
        self.resource.external_ref()
    }
}

/// Result of a single readiness poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Readiness {
    Pending,
    Ready { endpoint: Option<String> },
}

impl Readiness {
    pub fn ready(endpoint: impl Into<String>) -> Self {
        Readiness::Ready {
            endpoint: Some(endpoint.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Forward and backward provisioning of a single resource.
///
/// Calls are short and non-blocking with respect to readiness: retries,
/// backoff and timeouts belong to the caller.
#[async_trait]
pub trait ProvisioningDriver: Send + Sync {
    /// Create the resource, or return the existing one when an object tagged
    /// with the context's deterministic id is already present.
    async fn ensure_created(&self, ctx: &ResourceContext) -> DriverResult<ExternalRef>;

    /// Poll readiness once.
    async fn check_ready(&self, ctx: &ResourceContext) -> DriverResult<Readiness>;

    /// Destroy the resource. An already-absent resource is success.
    async fn destroy(&self, ctx: &ResourceContext) -> DriverResult<()>;

    /// Short identifier used in logs.
    fn name(&self) -> &str {
        "driver"
    }
}
