//! Doctor runner, reports and provider presets

use crate::check::{Check, CheckResult, CheckStatus};
use crate::checks::{CommandCheck, EnvVarCheck, FileCheck, HttpCheck, ToolCheck};
use crate::config::{home_dir, DoctorConfig};
use crate::error::DoctorResult;
use async_trait::async_trait;
use ephem_types::Provider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Ordered list of independent checks.
#[derive(Default)]
pub struct Doctor {
    provider: Option<Provider>,
    checks: Vec<Box<dyn Check>>,
}

impl Doctor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check(mut self, check: impl Check + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn push(&mut self, check: Box<dyn Check>) {
        self.checks.push(check);
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Preset checks for provisioning against `provider`.
    pub fn for_provider(provider: Provider, config: &DoctorConfig) -> DoctorResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let mut doctor = Doctor {
            provider: Some(provider),
            checks: Vec::new(),
        };

        match provider {
            Provider::LocalCluster => {
                let mut kubectl = ToolCheck::new("kubectl")
                    .version_args(["version", "--client"])
                    .hint("Install kubectl: https://kubernetes.io/docs/tasks/tools/");
                if let Some(min) = &config.min_kubectl_version {
                    kubectl = kubectl.min_version(min)?;
                }
                doctor.push(Box::new(kubectl));
                doctor.push(Box::new(
                    ToolCheck::new("minikube")
                        .optional()
                        .hint("Install minikube: https://minikube.sigs.k8s.io/docs/start/"),
                ));
                doctor.push(Box::new(
                    FileCheck::new("kubeconfig", config.kubeconfig_path())
                        .hint("Start a cluster or point KUBECONFIG at its config"),
                ));
                doctor.push(Box::new(
                    CommandCheck::new("cluster reachable", "kubectl", ["cluster-info"])
                        .timeout(Duration::from_secs(10))
                        .hint("Run `minikube start`"),
                ));
                doctor.push(Box::new(
                    CommandCheck::new("minikube running", "minikube", ["status"])
                        .expect_stdout("Running")
                        .optional()
                        .hint("Run `minikube start`"),
                ));
            }
            Provider::Gcp => {
                doctor.push(Box::new(
                    ToolCheck::new("gcloud")
                        .hint("Install the Google Cloud SDK: https://cloud.google.com/sdk/docs/install"),
                ));
                doctor.push(Box::new(
                    EnvVarCheck::any_of(["GOOGLE_APPLICATION_CREDENTIALS", "CLOUDSDK_AUTH_ACCESS_TOKEN"])
                        .optional()
                        .hint("Run `gcloud auth application-default login`"),
                ));
                doctor.push(Box::new(
                    FileCheck::new(
                        "gcloud application default credentials",
                        home_dir()
                            .join(".config")
                            .join("gcloud")
                            .join("application_default_credentials.json"),
                    )
                    .optional()
                    .hint("Run `gcloud auth application-default login`"),
                ));
                doctor.push(Box::new(
                    HttpCheck::new("GCP API reachable", &config.gcp_endpoint)?.timeout(timeout),
                ));
            }
            Provider::Aws => {
                doctor.push(Box::new(
                    ToolCheck::new("aws")
                        .hint("Install the AWS CLI: https://aws.amazon.com/cli/"),
                ));
                doctor.push(Box::new(
                    EnvVarCheck::any_of(["AWS_ACCESS_KEY_ID", "AWS_PROFILE"])
                        .optional()
                        .hint("Export AWS credentials or run `aws configure`"),
                ));
                doctor.push(Box::new(
                    FileCheck::new(
                        "aws credentials file",
                        home_dir().join(".aws").join("credentials"),
                    )
                    .optional()
                    .hint("Run `aws configure`"),
                ));
                doctor.push(Box::new(
                    HttpCheck::new("AWS API reachable", &config.aws_endpoint)?.timeout(timeout),
                ));
            }
        }

        Ok(doctor)
    }

    /// Run every check in order and collect the report.
    pub async fn run_doctor(&self) -> DoctorReport {
        let mut results = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            let name = check.name();
            let outcome = check.run().await;
            let status = match outcome.status {
                CheckStatus::Fail if !check.required() => CheckStatus::Warn,
                status => status,
            };
            debug!(check = %name, status = %status, detail = %outcome.detail, "Doctor check finished");
            results.push(CheckResult {
                name,
                status,
                detail: outcome.detail,
                hint: outcome.hint,
            });
        }

        let report = DoctorReport {
            provider: self.provider,
            results,
        };
        info!(
            provider = ?self.provider,
            failures = report.count(CheckStatus::Fail),
            warnings = report.count(CheckStatus::Warn),
            "Doctor run complete"
        );
        report
    }
}

/// Ordered results of a doctor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorReport {
    pub provider: Option<Provider>,
    pub results: Vec<CheckResult>,
}

impl DoctorReport {
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status == CheckStatus::Fail)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.status == CheckStatus::Fail)
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            Some(provider) => writeln!(f, "Ephem Doctor ({})", provider)?,
            None => writeln!(f, "Ephem Doctor")?,
        }
        writeln!(f)?;
        for result in &self.results {
            writeln!(f, "  {} {}: {}", result.status.marker(), result.name, result.detail)?;
            if let Some(hint) = &result.hint {
                if result.status != CheckStatus::Pass {
                    writeln!(f, "       hint: {}", hint)?;
                }
            }
        }
        writeln!(f)?;
        if self.has_failures() {
            write!(
                f,
                "Doctor found {} failing check(s)",
                self.count(CheckStatus::Fail)
            )
        } else {
            write!(f, "  [OK] All required checks passed")
        }
    }
}

/// Gate run before provisioning against a provider.
#[async_trait]
pub trait Preflight: Send + Sync {
    async fn preflight(&self, provider: Provider) -> DoctorResult<DoctorReport>;
}

/// Runs the provider preset from [`Doctor::for_provider`].
#[derive(Debug, Clone, Default)]
pub struct ProviderPreflight {
    config: DoctorConfig,
}

impl ProviderPreflight {
    pub fn new(config: DoctorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Preflight for ProviderPreflight {
    async fn preflight(&self, provider: Provider) -> DoctorResult<DoctorReport> {
        Ok(Doctor::for_provider(provider, &self.config)?.run_doctor().await)
    }
}

/// A fixed doctor gates every provider the same way.
#[async_trait]
impl Preflight for Doctor {
    async fn preflight(&self, _provider: Provider) -> DoctorResult<DoctorReport> {
        Ok(self.run_doctor().await)
    }
}
