//! Deploy and teardown sequencing

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::request::{DeployRequest, TeardownReport};
use crate::retry::{retry_driver_call, RetryError, RetryPolicy, Step};
use chrono::Utc;
use ephem_doctor::Preflight;
use ephem_driver::{DriverRegistry, ProvisioningDriver, Readiness, ResourceContext};
use ephem_store::StackStore;
use ephem_types::{
    OperationFailure, Phase, ResourceState, ServiceUrls, Stack, StackName, StackState,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Stack lifecycle engine.
///
/// Holds no per-stack state of its own: everything it knows about a stack is
/// read from and written to the store, so any number of orchestrators (or a
/// restarted one) can pick up where another left off.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn StackStore>,
    drivers: DriverRegistry,
    policy: RetryPolicy,
    preflight: Option<Arc<dyn Preflight>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn StackStore>, drivers: DriverRegistry) -> Self {
        Self {
            store,
            drivers,
            policy: RetryPolicy::default(),
            preflight: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Gate every deploy on a passing doctor run for the stack's provider.
    pub fn with_preflight(mut self, preflight: Arc<dyn Preflight>) -> Self {
        self.preflight = Some(preflight);
        self
    }

    pub fn store(&self) -> &Arc<dyn StackStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn driver_for(&self, stack: &Stack) -> OrchestratorResult<Arc<dyn ProvisioningDriver>> {
        self.drivers
            .get(stack.provider)
            .ok_or(OrchestratorError::NoDriver(stack.provider))
    }

    /// Write `stack` if the stored state is still `expected`.
    async fn commit(&self, stack: &mut Stack, expected: StackState) -> OrchestratorResult<()> {
        *stack = self
            .store
            .compare_and_swap(&stack.name, expected, stack)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deploy
    // ------------------------------------------------------------------

    /// Provision every resource of `request` in order and return the service
    /// URLs of the running stack.
    #[instrument(skip(self, request, cancel), fields(stack = %request.name, provider = %request.provider))]
    pub async fn deploy(
        &self,
        request: DeployRequest,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<ServiceUrls> {
        request.validate().map_err(OrchestratorError::InvalidRequest)?;

        if let Some(preflight) = &self.preflight {
            let report = preflight.preflight(request.provider).await?;
            if report.has_failures() {
                warn!("Preflight failed, refusing to provision");
                return Err(OrchestratorError::PreflightFailed(Box::new(report)));
            }
        }

        let driver = self
            .drivers
            .get(request.provider)
            .ok_or(OrchestratorError::NoDriver(request.provider))?;

        let now = Utc::now();
        let deadline = request
            .ttl
            .map(|ttl| {
                chrono::Duration::from_std(ttl)
                    .ok()
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .ok_or_else(|| {
                        OrchestratorError::InvalidRequest(format!("ttl out of range: {}s", ttl.as_secs()))
                    })
            })
            .transpose()?;

        let planned = Stack::planned(request.name, request.provider, request.resources, deadline, now)?;
        let mut stack = self.store.create(&planned).await?;
        info!(resources = stack.resources.len(), deadline = ?stack.teardown_deadline, "Stack planned");

        stack.transition(StackState::Provisioning, Utc::now())?;
        self.commit(&mut stack, StackState::Planned).await?;

        for index in 0..stack.resources.len() {
            self.provision_resource(&mut stack, index, driver.as_ref(), cancel)
                .await?;
        }

        stack.service_urls = stack.collect_service_urls();
        stack.transition(StackState::Running, Utc::now())?;
        self.commit(&mut stack, StackState::Provisioning).await?;

        info!(urls = stack.service_urls.len(), "Stack running");
        Ok(stack.service_urls.clone())
    }

    async fn provision_resource(
        &self,
        stack: &mut Stack,
        index: usize,
        driver: &dyn ProvisioningDriver,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<()> {
        let name = stack.resources[index].name().to_string();

        // Record intent first: from here on teardown must consider the
        // resource possibly present.
        stack.resources[index].state = ResourceState::Creating;
        stack.resources[index].create_attempted = true;
        self.commit(stack, StackState::Provisioning).await?;

        let ctx = ResourceContext::new(stack.name.clone(), stack.provider, stack.resources[index].clone());
        debug!(resource = %name, id = %ctx.deterministic_id, "Creating resource");

        let created = retry_driver_call(&self.policy, cancel, &format!("create {}", name), || async {
            driver.ensure_created(&ctx).await.map(Step::Done)
        })
        .await;
        let external_ref = match created {
            Ok(external_ref) => external_ref,
            Err(err) => return Err(self.abort_deploy(stack, index, Phase::Create, err, driver, cancel).await),
        };

        if let Err(err) = stack.resources[index].assign_external_ref(external_ref) {
            let failure = OperationFailure::new(
                &name,
                Phase::Create,
                ephem_types::FailureKind::Permanent,
                err.to_string(),
            );
            return Err(self.fail_deploy(stack, index, failure, driver, cancel).await);
        }

        if let Err(err) = self.commit(stack, StackState::Provisioning).await {
            // The stack moved on without us; whoever owns it never saw this
            // object, so it must not outlive the call.
            warn!(resource = %name, error = %err, "Lost stack after create, destroying resource");
            let ctx = ResourceContext::new(stack.name.clone(), stack.provider, stack.resources[index].clone());
            let cleanup = retry_driver_call(&self.policy, cancel, &format!("destroy {}", name), || async {
                driver.destroy(&ctx).await.map(Step::Done)
            })
            .await;
            if let Err(cleanup_err) = cleanup {
                error!(resource = %name, error = ?cleanup_err, "Could not destroy orphaned resource");
            }
            return Err(err);
        }

        let ctx = ResourceContext::new(stack.name.clone(), stack.provider, stack.resources[index].clone());
        let ready = retry_driver_call(&self.policy, cancel, &format!("ready {}", name), || async {
            match driver.check_ready(&ctx).await? {
                Readiness::Ready { endpoint } => Ok(Step::Done(endpoint)),
                Readiness::Pending => Ok(Step::Pending),
            }
        })
        .await;
        let endpoint = match ready {
            Ok(endpoint) => endpoint,
            Err(err) => return Err(self.abort_deploy(stack, index, Phase::Ready, err, driver, cancel).await),
        };

        stack.resources[index].state = ResourceState::Ready;
        stack.resources[index].endpoint = endpoint;
        self.commit(stack, StackState::Provisioning).await?;
        info!(resource = %name, "Resource ready");
        Ok(())
    }

    async fn abort_deploy(
        &self,
        stack: &mut Stack,
        index: usize,
        phase: Phase,
        err: RetryError,
        driver: &dyn ProvisioningDriver,
        cancel: &CancellationToken,
    ) -> OrchestratorError {
        match err.into_failure(stack.resources[index].name(), phase) {
            Some(failure) => self.fail_deploy(stack, index, failure, driver, cancel).await,
            None => {
                warn!("Deploy cancelled, leaving stack in its last recorded state");
                OrchestratorError::Cancelled(stack.name.to_string())
            }
        }
    }

    /// Move the stack to Failed and clean up what was created, newest first.
    async fn fail_deploy(
        &self,
        stack: &mut Stack,
        index: usize,
        failure: OperationFailure,
        driver: &dyn ProvisioningDriver,
        cancel: &CancellationToken,
    ) -> OrchestratorError {
        error!(resource = %failure.resource, phase = %failure.phase, kind = %failure.kind, message = %failure.message, "Deploy failed");

        stack.resources[index].state = ResourceState::Errored;
        stack.record_failure(failure.clone());
        let failed = stack
            .transition(StackState::Failed, Utc::now())
            .map_err(OrchestratorError::from);
        let recorded = match failed {
            Ok(()) => self.commit(stack, StackState::Provisioning).await,
            Err(err) => Err(err),
        };
        if let Err(err) = recorded {
            // Another writer owns the stack now and is responsible for cleanup
            warn!(error = %err, "Could not record deploy failure");
            return OrchestratorError::DeployFailed(failure);
        }

        self.cleanup_failed(stack, driver, cancel).await;
        OrchestratorError::DeployFailed(failure)
    }

    /// Best-effort destroy of every resource whose creation was attempted.
    async fn cleanup_failed(
        &self,
        stack: &mut Stack,
        driver: &dyn ProvisioningDriver,
        cancel: &CancellationToken,
    ) {
        for index in (0..stack.resources.len()).rev() {
            let resource = &stack.resources[index];
            if !resource.create_attempted || !resource.needs_destroy() {
                continue;
            }
            let name = resource.name().to_string();

            stack.resources[index].state = ResourceState::Destroying;
            if let Err(err) = self.commit(stack, StackState::Failed).await {
                warn!(error = %err, "Stack changed during cleanup, stopping");
                return;
            }
            let ctx = ResourceContext::new(stack.name.clone(), stack.provider, stack.resources[index].clone());

            let destroyed = retry_driver_call(&self.policy, cancel, &format!("destroy {}", name), || async {
                driver.destroy(&ctx).await.map(Step::Done)
            })
            .await;
            match destroyed {
                Ok(()) => {
                    stack.resources[index].state = ResourceState::Destroyed;
                    stack.resources[index].endpoint = None;
                }
                Err(RetryError::Cancelled) => {
                    warn!("Cleanup cancelled");
                    return;
                }
                Err(err) => {
                    if let Some(failure) = err.into_failure(&name, Phase::Destroy) {
                        warn!(resource = %name, message = %failure.message, "Cleanup of resource failed");
                        stack.resources[index].state = ResourceState::Errored;
                        stack.record_failure(failure);
                    }
                }
            }

            if let Err(err) = self.commit(stack, StackState::Failed).await {
                warn!(error = %err, "Stack changed during cleanup, stopping");
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Destroy every resource of a stack, newest first.
    ///
    /// Destroyed stacks are a no-op. Resources already destroyed by an earlier
    /// partial teardown are skipped.
    #[instrument(skip(self, cancel), fields(stack = %name))]
    pub async fn teardown(
        &self,
        name: &StackName,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<TeardownReport> {
        let mut stack = self.store.get(name).await?;
        if stack.state == StackState::Destroyed {
            debug!("Stack already destroyed");
            return Ok(TeardownReport {
                stack_name: name.clone(),
                state: StackState::Destroyed,
                destroyed: Vec::new(),
                already_destroyed: true,
            });
        }

        let driver = self.driver_for(&stack)?;

        if stack.state != StackState::TearingDown {
            let from = stack.state;
            stack.transition(StackState::TearingDown, Utc::now())?;
            self.commit(&mut stack, from).await?;
            info!(from = %from, "Teardown started");
        } else {
            info!("Resuming teardown");
        }

        let mut destroyed = Vec::new();
        let mut failures = Vec::new();

        for index in (0..stack.resources.len()).rev() {
            let resource = &stack.resources[index];
            if !resource.needs_destroy() {
                continue;
            }
            let name = resource.name().to_string();

            if !resource.create_attempted && resource.external_ref().is_none() {
                // Never reached the provider
                stack.resources[index].state = ResourceState::Destroyed;
                self.commit(&mut stack, StackState::TearingDown).await?;
                continue;
            }

            stack.resources[index].state = ResourceState::Destroying;
            self.commit(&mut stack, StackState::TearingDown).await?;

            let ctx = ResourceContext::new(stack.name.clone(), stack.provider, stack.resources[index].clone());
            let result = retry_driver_call(&self.policy, cancel, &format!("destroy {}", name), || async {
                driver.destroy(&ctx).await.map(Step::Done)
            })
            .await;

            match result {
                Ok(()) => {
                    info!(resource = %name, "Resource destroyed");
                    stack.resources[index].state = ResourceState::Destroyed;
                    stack.resources[index].endpoint = None;
                    destroyed.push(name);
                }
                Err(err) => match err.into_failure(&name, Phase::Destroy) {
                    Some(failure) => {
                        warn!(resource = %name, message = %failure.message, "Destroy failed");
                        stack.resources[index].state = ResourceState::Errored;
                        stack.record_failure(failure.clone());
                        failures.push(failure);
                    }
                    None => {
                        self.commit(&mut stack, StackState::TearingDown).await?;
                        return Err(OrchestratorError::Cancelled(stack.name.to_string()));
                    }
                },
            }

            self.commit(&mut stack, StackState::TearingDown).await?;
        }

        if !failures.is_empty() {
            warn!(failed = failures.len(), "Teardown incomplete, stack left tearing down");
            return Err(OrchestratorError::TeardownIncomplete {
                name: stack.name.to_string(),
                failures,
            });
        }

        stack.transition(StackState::Destroyed, Utc::now())?;
        self.commit(&mut stack, StackState::TearingDown).await?;
        info!(destroyed = destroyed.len(), "Stack destroyed");

        Ok(TeardownReport {
            stack_name: stack.name,
            state: StackState::Destroyed,
            destroyed,
            already_destroyed: false,
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_service_urls(&self, name: &StackName) -> OrchestratorResult<ServiceUrls> {
        let stack = self.store.get(name).await?;
        if stack.state != StackState::Running {
            return Err(OrchestratorError::NotReady {
                name: name.to_string(),
                state: stack.state,
            });
        }
        Ok(stack.service_urls)
    }

    /// Reattach to an existing stack by name.
    pub async fn get_stack(&self, name: &StackName) -> OrchestratorResult<Stack> {
        Ok(self.store.get(name).await?)
    }

    pub async fn list_stacks(&self, include_destroyed: bool) -> OrchestratorResult<Vec<Stack>> {
        let stacks = if include_destroyed {
            self.store.list_all().await?
        } else {
            self.store.list_active().await?
        };
        Ok(stacks)
    }
}
