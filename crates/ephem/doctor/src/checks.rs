//! Built-in checks

use crate::check::{Check, CheckOutcome};
use crate::error::{DoctorError, DoctorResult};
use async_trait::async_trait;
use semver::Version;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Binary present on `PATH`, optionally at a minimum version.
#[derive(Debug, Clone)]
pub struct ToolCheck {
    binary: String,
    version_args: Vec<String>,
    min_version: Option<Version>,
    required: bool,
    hint: Option<String>,
    search_path: Option<OsString>,
}

impl ToolCheck {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            version_args: vec!["--version".to_string()],
            min_version: None,
            required: true,
            hint: None,
            search_path: None,
        }
    }

    /// Require at least `min` (`1.28` and `1.28.0` are both accepted).
    pub fn min_version(mut self, min: &str) -> DoctorResult<Self> {
        let version = parse_version(min).ok_or_else(|| DoctorError::InvalidVersion {
            value: min.to_string(),
            reason: "not a semantic version".to_string(),
        })?;
        self.min_version = Some(version);
        Ok(self)
    }

    pub fn version_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.version_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Search this `PATH`-style list instead of the process environment.
    pub fn search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    fn locate(&self) -> Option<PathBuf> {
        let path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(&self.binary))
            .find(|candidate| candidate.is_file())
    }
}

#[async_trait]
impl Check for ToolCheck {
    fn name(&self) -> String {
        format!("tool {}", self.binary)
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn run(&self) -> CheckOutcome {
        let Some(location) = self.locate() else {
            return CheckOutcome::fail(format!("{} not found on PATH", self.binary))
                .with_hint(self.hint.clone());
        };

        let Some(min) = &self.min_version else {
            return CheckOutcome::pass(format!("{} found at {}", self.binary, location.display()));
        };

        let output = tokio::time::timeout(
            DEFAULT_TIMEOUT,
            Command::new(&location)
                .args(&self.version_args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;
        let stdout = match output {
            Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).into_owned(),
            Ok(Err(e)) => {
                return CheckOutcome::fail(format!("cannot run {}: {}", self.binary, e))
                    .with_hint(self.hint.clone())
            }
            Err(_) => {
                return CheckOutcome::fail(format!("{} version query timed out", self.binary))
                    .with_hint(self.hint.clone())
            }
        };

        match stdout.split_whitespace().find_map(parse_version) {
            Some(found) if found >= *min => {
                CheckOutcome::pass(format!("{} {} (>= {})", self.binary, found, min))
            }
            Some(found) => CheckOutcome::fail(format!(
                "{} {} is older than the required {}",
                self.binary, found, min
            ))
            .with_hint(self.hint.clone()),
            None => CheckOutcome::warn(format!(
                "{} found but its version could not be determined",
                self.binary
            )),
        }
    }
}

/// Extract a semantic version from a token such as `v1.28`, `aws-cli/2.15.0`
/// or `460.0.0,`.
pub fn parse_version(token: &str) -> Option<Version> {
    token.split(['/', ',', '+']).find_map(|part| {
        let part = part.trim().trim_start_matches('v');
        let numeric: String = part
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let numeric = numeric.trim_end_matches('.');
        let segments: Vec<&str> = numeric.split('.').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 || segments.len() > 3 {
            return None;
        }
        let padded = match segments.len() {
            2 => format!("{}.{}.0", segments[0], segments[1]),
            _ => segments.join("."),
        };
        Version::parse(&padded).ok()
    })
}

/// At least one of the listed environment variables is set and non-empty.
#[derive(Debug, Clone)]
pub struct EnvVarCheck {
    vars: Vec<String>,
    required: bool,
    hint: Option<String>,
}

impl EnvVarCheck {
    pub fn new(var: impl Into<String>) -> Self {
        Self::any_of([var.into()])
    }

    pub fn any_of<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(Into::into).collect(),
            required: true,
            hint: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[async_trait]
impl Check for EnvVarCheck {
    fn name(&self) -> String {
        format!("env {}", self.vars.join("|"))
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn run(&self) -> CheckOutcome {
        let set = self.vars.iter().find(|var| {
            std::env::var_os(var.as_str()).is_some_and(|value| !value.is_empty())
        });
        match set {
            Some(var) => CheckOutcome::pass(format!("{} is set", var)),
            None => CheckOutcome::fail(format!("none of {} is set", self.vars.join(", ")))
                .with_hint(self.hint.clone()),
        }
    }
}

/// A credential or config file exists.
#[derive(Debug, Clone)]
pub struct FileCheck {
    label: String,
    path: PathBuf,
    required: bool,
    hint: Option<String>,
}

impl FileCheck {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
            required: true,
            hint: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Check for FileCheck {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn run(&self) -> CheckOutcome {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_file() => {
                CheckOutcome::pass(format!("{} present", self.path.display()))
            }
            Ok(_) => CheckOutcome::fail(format!("{} is not a regular file", self.path.display()))
                .with_hint(self.hint.clone()),
            Err(e) => CheckOutcome::fail(format!("{} not readable: {}", self.path.display(), e))
                .with_hint(self.hint.clone()),
        }
    }
}

/// TCP endpoint accepts a connection within the timeout.
#[derive(Debug, Clone)]
pub struct TcpCheck {
    label: String,
    host: String,
    port: u16,
    timeout: Duration,
    required: bool,
}

impl TcpCheck {
    pub fn new(label: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            label: label.into(),
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            required: true,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[async_trait]
impl Check for TcpCheck {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn run(&self) -> CheckOutcome {
        let connect = tokio::net::TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => CheckOutcome::pass(format!("{}:{} reachable", self.host, self.port)),
            Ok(Err(e)) => CheckOutcome::fail(format!(
                "cannot connect to {}:{} ({})",
                self.host, self.port, e
            )),
            Err(_) => CheckOutcome::fail(format!(
                "connection to {}:{} timed out",
                self.host, self.port
            )),
        }
    }
}

/// URL answers within the timeout.
///
/// By default any HTTP response proves reachability; [`HttpCheck::require_success`]
/// additionally demands a 2xx status.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    label: String,
    url: reqwest::Url,
    timeout: Duration,
    require_success: bool,
    required: bool,
}

impl HttpCheck {
    pub fn new(label: impl Into<String>, url: &str) -> DoctorResult<Self> {
        let url = reqwest::Url::parse(url).map_err(|_| DoctorError::InvalidEndpoint(url.to_string()))?;
        Ok(Self {
            label: label.into(),
            url,
            timeout: DEFAULT_TIMEOUT,
            require_success: false,
            required: true,
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn require_success(mut self) -> Self {
        self.require_success = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[async_trait]
impl Check for HttpCheck {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn run(&self) -> CheckOutcome {
        let client = match reqwest::Client::builder().timeout(self.timeout).build() {
            Ok(client) => client,
            Err(e) => return CheckOutcome::fail(format!("cannot build HTTP client: {}", e)),
        };

        match client.get(self.url.clone()).send().await {
            Ok(resp) if !self.require_success || resp.status().is_success() => {
                CheckOutcome::pass(format!("{} answered {}", self.url, resp.status()))
            }
            Ok(resp) => CheckOutcome::fail(format!("{} returned {}", self.url, resp.status())),
            Err(e) if e.is_timeout() => CheckOutcome::fail(format!("{} timed out", self.url)),
            Err(e) => CheckOutcome::fail(format!("{} unreachable: {}", self.url, e)),
        }
    }
}

/// Command exits 0 and, optionally, prints a marker.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    label: String,
    program: String,
    args: Vec<String>,
    expect_stdout: Option<String>,
    timeout: Duration,
    required: bool,
    hint: Option<String>,
}

impl CommandCheck {
    pub fn new<I, S>(label: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            expect_stdout: None,
            timeout: Duration::from_secs(10),
            required: true,
            hint: None,
        }
    }

    pub fn expect_stdout(mut self, marker: impl Into<String>) -> Self {
        self.expect_stdout = Some(marker.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[async_trait]
impl Check for CommandCheck {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn required(&self) -> bool {
        self.required
    }

    async fn run(&self) -> CheckOutcome {
        let command = format!("{} {}", self.program, self.args.join(" "));
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return CheckOutcome::fail(format!("cannot run `{}`: {}", command.trim(), e))
                    .with_hint(self.hint.clone())
            }
            Err(_) => {
                return CheckOutcome::fail(format!("`{}` timed out", command.trim()))
                    .with_hint(self.hint.clone())
            }
        };

        if !output.status.success() {
            return CheckOutcome::fail(format!("`{}` exited with {}", command.trim(), output.status))
                .with_hint(self.hint.clone());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match &self.expect_stdout {
            Some(marker) if !stdout.contains(marker.as_str()) => CheckOutcome::fail(format!(
                "`{}` output does not mention '{}'",
                command.trim(),
                marker
            ))
            .with_hint(self.hint.clone()),
            _ => CheckOutcome::pass(format!("`{}` ok", command.trim())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;

    #[test]
    fn test_parse_version_forms() {
        assert_eq!(parse_version("v1.28.2"), Some(Version::new(1, 28, 2)));
        assert_eq!(parse_version("aws-cli/2.15.0"), Some(Version::new(2, 15, 0)));
        assert_eq!(parse_version("460.0.0,"), Some(Version::new(460, 0, 0)));
        assert_eq!(parse_version("1.28"), Some(Version::new(1, 28, 0)));
        assert_eq!(parse_version("Version:"), None);
        assert_eq!(parse_version("42"), None);
    }

    #[test]
    fn test_invalid_min_version_is_rejected() {
        assert!(ToolCheck::new("kubectl").min_version("latest").is_err());
    }

    #[tokio::test]
    async fn test_missing_tool_fails_with_hint() {
        let check = ToolCheck::new("ephem-no-such-tool")
            .search_path("/nonexistent")
            .hint("install it");
        let outcome = check.run().await;
        assert_eq!(outcome.status, CheckStatus::Fail);
        assert_eq!(outcome.hint.as_deref(), Some("install it"));
    }

    #[tokio::test]
    async fn test_env_var_any_of() {
        // PATH is always present in a test process
        let outcome = EnvVarCheck::any_of(["EPHEM_SURELY_UNSET_VAR", "PATH"]).run().await;
        assert_eq!(outcome.status, CheckStatus::Pass);

        let outcome = EnvVarCheck::new("EPHEM_SURELY_UNSET_VAR").run().await;
        assert_eq!(outcome.status, CheckStatus::Fail);
    }

    #[tokio::test]
    async fn test_file_check() {
        let path = std::env::temp_dir().join(format!("ephem-doctor-{}.conf", std::process::id()));
        std::fs::write(&path, "apiVersion: v1").unwrap();
        assert_eq!(FileCheck::new("kubeconfig", &path).run().await.status, CheckStatus::Pass);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(FileCheck::new("kubeconfig", &path).run().await.status, CheckStatus::Fail);
    }

    #[tokio::test]
    async fn test_tcp_check_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let outcome = TcpCheck::new("local", "127.0.0.1", port).run().await;
        assert_eq!(outcome.status, CheckStatus::Pass);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_check_marker() {
        let running = CommandCheck::new("cluster", "sh", ["-c", "echo 'host: Running'"])
            .expect_stdout("Running");
        assert_eq!(running.run().await.status, CheckStatus::Pass);

        let stopped = CommandCheck::new("cluster", "sh", ["-c", "echo 'host: Stopped'"])
            .expect_stdout("Running");
        assert_eq!(stopped.run().await.status, CheckStatus::Fail);

        let failing = CommandCheck::new("cluster", "sh", ["-c", "exit 3"]);
        assert_eq!(failing.run().await.status, CheckStatus::Fail);
    }
}
