//! Resources owned by a stack.

use crate::error::TypesError;
use crate::ids::StackName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared resource, as produced by the external template renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Logical name, unique within the stack. Also the service URL key.
    pub name: String,

    /// Free-form resource kind (`postgres`, `mlflow-server`, `k8s-deployment`, ...)
    pub kind: String,

    /// Whether the resource publishes a reachable service URL.
    #[serde(default)]
    pub expose: bool,

    /// Opaque, already-rendered configuration handed to the driver.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            expose: false,
            config: serde_json::Value::Null,
        }
    }

    pub fn exposed(mut self) -> Self {
        self.expose = true;
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        if self.name.trim().is_empty() {
            return Err(TypesError::InvalidResource(
                "resource name must not be empty".to_string(),
            ));
        }
        if self.kind.trim().is_empty() {
            return Err(TypesError::InvalidResource(format!(
                "resource '{}' has an empty kind",
                self.name
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Pending,
    Creating,
    Ready,
    Destroying,
    Destroyed,
    Errored,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceState::Pending => "pending",
            ResourceState::Creating => "creating",
            ResourceState::Ready => "ready",
            ResourceState::Destroying => "destroying",
            ResourceState::Destroyed => "destroyed",
            ResourceState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// A resource together with its observed provisioning state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(flatten)]
    pub spec: ResourceSpec,

    /// Provider-assigned identifier. Set once, at creation.
    #[serde(default)]
    external_ref: Option<String>,

    pub state: ResourceState,

    /// Reachable address reported by the driver once ready.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Whether a create call was ever issued for this resource.
    #[serde(default)]
    pub create_attempted: bool,
}

impl Resource {
    pub fn from_spec(spec: ResourceSpec) -> Self {
        Self {
            spec,
            external_ref: None,
            state: ResourceState::Pending,
            endpoint: None,
            create_attempted: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn kind(&self) -> &str {
        &self.spec.kind
    }

    pub fn external_ref(&self) -> Option<&str> {
        self.external_ref.as_deref()
    }

    /// Record the provider-assigned identifier.
    ///
    /// Re-assigning the same value is a no-op; a different value is rejected.
    pub fn assign_external_ref(&mut self, external_ref: impl Into<String>) -> Result<(), TypesError> {
        let external_ref = external_ref.into();
        match &self.external_ref {
            None => {
                self.external_ref = Some(external_ref);
                Ok(())
            }
            Some(current) if *current == external_ref => Ok(()),
            Some(current) => Err(TypesError::ExternalRefImmutable {
                resource: self.spec.name.clone(),
                current: current.clone(),
                attempted: external_ref,
            }),
        }
    }

    /// Deterministic tag drivers attach to external objects so that create and
    /// destroy stay idempotent across retries and restarts.
    pub fn deterministic_id(&self, stack: &StackName) -> String {
        let raw = format!("{}-{}-{}", stack, self.spec.kind, self.spec.name);
        let mut id: String = raw
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        while id.contains("--") {
            id = id.replace("--", "-");
        }
        id.trim_matches('-').to_string()
    }

    /// Whether teardown still has work to do for this resource.
    pub fn needs_destroy(&self) -> bool {
        self.state != ResourceState::Destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_ref_set_once() {
        let mut resource = Resource::from_spec(ResourceSpec::new("db", "postgres"));
        assert!(resource.external_ref().is_none());

        resource.assign_external_ref("pg-123").unwrap();
        assert_eq!(resource.external_ref(), Some("pg-123"));

        // Same value again is idempotent
        resource.assign_external_ref("pg-123").unwrap();

        let err = resource.assign_external_ref("pg-456").unwrap_err();
        assert!(matches!(err, TypesError::ExternalRefImmutable { .. }));
        assert_eq!(resource.external_ref(), Some("pg-123"));
    }

    #[test]
    fn test_deterministic_id_is_sanitized() {
        let stack = StackName::new("demo").unwrap();
        let resource = Resource::from_spec(ResourceSpec::new("Tracking_Server", "mlflow/server"));
        assert_eq!(resource.deterministic_id(&stack), "demo-mlflow-server-tracking-server");
        assert_eq!(
            resource.deterministic_id(&stack),
            resource.clone().deterministic_id(&stack)
        );
    }

    #[test]
    fn test_spec_validation() {
        assert!(ResourceSpec::new("db", "postgres").validate().is_ok());
        assert!(ResourceSpec::new("", "postgres").validate().is_err());
        assert!(ResourceSpec::new("db", " ").validate().is_err());
    }

    #[test]
    fn test_resource_serializes_flat() {
        let resource = Resource::from_spec(ResourceSpec::new("api", "fastapi").exposed());
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["name"], "api");
        assert_eq!(json["expose"], true);
        assert_eq!(json["state"], "pending");

        let back: Resource = serde_json::from_value(json).unwrap();
        assert_eq!(back, resource);
    }
}
