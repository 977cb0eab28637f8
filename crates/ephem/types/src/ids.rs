//! Strongly-typed identifiers for stacks and provisioning targets

use crate::error::TypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_NAME_LEN: usize = 63;

/// Unique, immutable stack name.
///
/// Stack names end up inside provider object names, so they follow DNS label
/// rules: 1-63 lowercase alphanumerics or `-`, alphanumeric at both ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StackName(String);

impl StackName {
    pub fn new(name: impl Into<String>) -> Result<Self, TypesError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_name(name: &str) -> Result<(), TypesError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(TypesError::InvalidName {
            name: name.to_string(),
            reason: format!("length must be between 1 and {}", MAX_NAME_LEN),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(TypesError::InvalidName {
            name: name.to_string(),
            reason: "only lowercase letters, digits and '-' are allowed".to_string(),
        });
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(TypesError::InvalidName {
            name: name.to_string(),
            reason: "must start and end with a letter or digit".to_string(),
        });
    }

    Ok(())
}

impl TryFrom<String> for StackName {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StackName> for String {
    fn from(name: StackName) -> Self {
        name.0
    }
}

impl FromStr for StackName {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for StackName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provisioning target a stack is deployed to. Immutable per stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// Local Kubernetes cluster (minikube, kind)
    LocalCluster,

    /// Google Cloud
    Gcp,

    /// Amazon Web Services
    Aws,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::LocalCluster, Provider::Gcp, Provider::Aws];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::LocalCluster => "local-cluster",
            Provider::Gcp => "gcp",
            Provider::Aws => "aws",
        }
    }
}

impl FromStr for Provider {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local-cluster" | "local" | "minikube" => Ok(Provider::LocalCluster),
            "gcp" | "google" => Ok(Provider::Gcp),
            "aws" => Ok(Provider::Aws),
            other => Err(TypesError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
