//! Hook-command driver.
//!
//! Each phase runs an operator-configured command. Arguments may contain the
//! placeholders `{stack}`, `{name}`, `{kind}`, `{id}` and `{ref}`; the same
//! values are exported as `EPHEM_*` environment variables together with the
//! resource's rendered config as JSON in `EPHEM_CONFIG`.
//!
//! Exit codes:
//! - `0`: success. For create, trimmed stdout is the external ref (the
//!   deterministic id when empty). For check, the first stdout line is the
//!   optional endpoint.
//! - `10`: not ready yet (check only)
//! - `75`: transient failure
//! - anything else, or a missing binary: permanent failure

use crate::error::{DriverError, DriverResult};
use crate::traits::{ExternalRef, ProvisioningDriver, Readiness, ResourceContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, warn};

pub const EXIT_NOT_READY: i32 = 10;
pub const EXIT_TEMPFAIL: i32 = 75;

/// Commands for each provisioning phase of one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookCommands {
    /// Program and arguments run by `ensure_created`.
    pub create: Vec<String>,

    /// Program and arguments run by `check_ready`. Empty means a created
    /// resource is immediately ready with no endpoint.
    #[serde(default)]
    pub check: Vec<String>,

    /// Program and arguments run by `destroy`.
    pub destroy: Vec<String>,

    /// Extra environment for every hook.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    Create,
    Check,
    Destroy,
}

impl Hook {
    fn as_str(&self) -> &'static str {
        match self {
            Hook::Create => "create",
            Hook::Check => "check",
            Hook::Destroy => "destroy",
        }
    }
}

/// Driver delegating every phase to external commands.
#[derive(Debug, Clone)]
pub struct HookDriver {
    name: String,
    commands: HookCommands,
}

impl HookDriver {
    pub fn new(name: impl Into<String>, commands: HookCommands) -> Self {
        Self {
            name: name.into(),
            commands,
        }
    }

    pub fn commands(&self) -> &HookCommands {
        &self.commands
    }

    fn argv(&self, hook: Hook) -> &[String] {
        match hook {
            Hook::Create => &self.commands.create,
            Hook::Check => &self.commands.check,
            Hook::Destroy => &self.commands.destroy,
        }
    }

    fn build_command(&self, hook: Hook, ctx: &ResourceContext) -> DriverResult<Command> {
        let argv: Vec<String> = self
            .argv(hook)
            .iter()
            .map(|arg| substitute(arg, ctx))
            .collect();
        let (program, args) = argv.split_first().ok_or_else(|| {
            DriverError::permanent(format!(
                "no {} hook configured for driver {}",
                hook.as_str(),
                self.name
            ))
        })?;

        let config = serde_json::to_string(&ctx.resource.spec.config)
            .map_err(|e| DriverError::permanent(format!("cannot encode resource config: {}", e)))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&self.commands.env)
            .env("EPHEM_STACK", ctx.stack_name.as_str())
            .env("EPHEM_PROVIDER", ctx.provider.as_str())
            .env("EPHEM_RESOURCE", ctx.name())
            .env("EPHEM_KIND", ctx.kind())
            .env("EPHEM_ID", &ctx.deterministic_id)
            .env("EPHEM_REF", ctx.external_ref().unwrap_or_default())
            .env("EPHEM_CONFIG", config)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.commands.working_dir {
            command.current_dir(dir);
        }
        Ok(command)
    }

    async fn run(&self, hook: Hook, ctx: &ResourceContext) -> DriverResult<Output> {
        let mut command = self.build_command(hook, ctx)?;
        debug!(
            driver = %self.name,
            stack = %ctx.stack_name,
            resource = %ctx.name(),
            hook = hook.as_str(),
            "Running hook"
        );

        command.output().await.map_err(|e| match e.kind() {
            IoErrorKind::NotFound | IoErrorKind::PermissionDenied => DriverError::permanent(
                format!("{} hook for {} cannot be executed: {}", hook.as_str(), ctx.name(), e),
            ),
            _ => DriverError::transient(format!(
                "{} hook for {} failed to start: {}",
                hook.as_str(),
                ctx.name(),
                e
            )),
        })
    }
}

fn substitute(arg: &str, ctx: &ResourceContext) -> String {
    arg.replace("{stack}", ctx.stack_name.as_str())
        .replace("{name}", ctx.name())
        .replace("{kind}", ctx.kind())
        .replace("{id}", &ctx.deterministic_id)
        .replace("{ref}", ctx.external_ref().unwrap_or_default())
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Map a non-success exit onto the driver error taxonomy.
fn exit_error(hook: Hook, ctx: &ResourceContext, output: &Output) -> DriverError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.trim();
    match output.status.code() {
        Some(EXIT_TEMPFAIL) => DriverError::transient(format!(
            "{} hook for {} asked for a retry: {}",
            hook.as_str(),
            ctx.name(),
            detail
        )),
        // Killed by a signal
        None => DriverError::transient(format!(
            "{} hook for {} was terminated: {}",
            hook.as_str(),
            ctx.name(),
            detail
        )),
        Some(code) => DriverError::permanent(format!(
            "{} hook for {} exited with {}: {}",
            hook.as_str(),
            ctx.name(),
            code,
            detail
        )),
    }
}

#[async_trait]
impl ProvisioningDriver for HookDriver {
    async fn ensure_created(&self, ctx: &ResourceContext) -> DriverResult<ExternalRef> {
        let output = self.run(Hook::Create, ctx).await?;
        if !output.status.success() {
            return Err(exit_error(Hook::Create, ctx, &output));
        }
        Ok(first_line(&output.stdout).unwrap_or_else(|| ctx.deterministic_id.clone()))
    }

    async fn check_ready(&self, ctx: &ResourceContext) -> DriverResult<Readiness> {
        if self.commands.check.is_empty() {
            return Ok(Readiness::Ready { endpoint: None });
        }

        let output = self.run(Hook::Check, ctx).await?;
        match output.status.code() {
            Some(0) => Ok(Readiness::Ready {
                endpoint: first_line(&output.stdout),
            }),
            Some(EXIT_NOT_READY) => Ok(Readiness::Pending),
            _ => Err(exit_error(Hook::Check, ctx, &output)),
        }
    }

    async fn destroy(&self, ctx: &ResourceContext) -> DriverResult<()> {
        let output = self.run(Hook::Destroy, ctx).await?;
        if !output.status.success() {
            let err = exit_error(Hook::Destroy, ctx, &output);
            warn!(driver = %self.name, resource = %ctx.name(), error = %err, "Destroy hook failed");
            return Err(err);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
