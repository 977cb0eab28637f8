//! Doctor configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Knobs for the provider presets and the provisioning preflight gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorConfig {
    /// Run the provider preset before every deploy
    pub preflight: bool,

    /// Kubeconfig location; falls back to `$KUBECONFIG`, then `~/.kube/config`
    pub kubeconfig: Option<PathBuf>,

    pub min_kubectl_version: Option<String>,

    /// Endpoint probed for GCP API reachability
    pub gcp_endpoint: String,

    /// Endpoint probed for AWS API reachability
    pub aws_endpoint: String,

    /// Per-check network timeout
    pub timeout_secs: u64,
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            preflight: true,
            kubeconfig: None,
            min_kubectl_version: None,
            gcp_endpoint: "https://cloudresourcemanager.googleapis.com/".to_string(),
            aws_endpoint: "https://sts.amazonaws.com/".to_string(),
            timeout_secs: 3,
        }
    }
}

impl DoctorConfig {
    pub fn kubeconfig_path(&self) -> PathBuf {
        if let Some(path) = &self.kubeconfig {
            return path.clone();
        }
        if let Some(first) = std::env::var_os("KUBECONFIG")
            .as_deref()
            .and_then(|value| std::env::split_paths(value).next())
        {
            return first;
        }
        home_dir().join(".kube").join("config")
    }
}

pub(crate) fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
