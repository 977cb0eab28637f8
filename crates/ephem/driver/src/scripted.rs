//! In-process driver double with scripted outcomes.
//!
//! Resources succeed by default: create returns `ext-<deterministic id>`,
//! readiness is immediate, and the endpoint is `http://<deterministic id>.test`.
//! Failures, slow readiness and delays are scripted per logical resource name.

use crate::error::{DriverError, DriverResult};
use crate::traits::{ExternalRef, ProvisioningDriver, Readiness, ResourceContext};
use async_trait::async_trait;
use ephem_types::Phase;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// One recorded driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub phase: Phase,
    pub stack: String,
    pub resource: String,
}

#[derive(Debug, Default)]
struct ResourceScript {
    create_failures: VecDeque<DriverError>,
    check_failures: VecDeque<DriverError>,
    destroy_failures: VecDeque<DriverError>,
    polls_until_ready: u32,
    endpoint: Option<String>,
    delays: HashMap<Phase, Duration>,
}

#[derive(Debug, Default)]
struct ScriptState {
    scripts: HashMap<String, ResourceScript>,
    calls: Vec<DriverCall>,
    polls: HashMap<String, u32>,
    /// Deterministic ids of objects currently alive.
    live: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct ScriptedDriver {
    state: Mutex<ScriptState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn script(&self, resource: &str, f: impl FnOnce(&mut ResourceScript)) {
        let mut state = self.lock();
        f(state.scripts.entry(resource.to_string()).or_default());
    }

    /// Fail the next create of `resource` once with `error`.
    pub fn fail_create(&self, resource: &str, error: DriverError) {
        self.fail_create_times(resource, 1, error);
    }

    pub fn fail_create_times(&self, resource: &str, times: usize, error: DriverError) {
        self.script(resource, |s| {
            s.create_failures.extend(std::iter::repeat(error).take(times))
        });
    }

    pub fn fail_check_times(&self, resource: &str, times: usize, error: DriverError) {
        self.script(resource, |s| {
            s.check_failures.extend(std::iter::repeat(error).take(times))
        });
    }

    pub fn fail_destroy(&self, resource: &str, error: DriverError) {
        self.fail_destroy_times(resource, 1, error);
    }

    pub fn fail_destroy_times(&self, resource: &str, times: usize, error: DriverError) {
        self.script(resource, |s| {
            s.destroy_failures.extend(std::iter::repeat(error).take(times))
        });
    }

    /// Report `Pending` for the first `polls` readiness checks.
    pub fn ready_after(&self, resource: &str, polls: u32) {
        self.script(resource, |s| s.polls_until_ready = polls);
    }

    pub fn with_endpoint(&self, resource: &str, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        self.script(resource, |s| s.endpoint = Some(endpoint));
    }

    /// Sleep for `delay` inside every `phase` call for `resource`.
    pub fn delay(&self, resource: &str, phase: Phase, delay: Duration) {
        self.script(resource, |s| {
            s.delays.insert(phase, delay);
        });
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, resource: &str, phase: Phase) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.resource == resource && c.phase == phase)
            .count()
    }

    /// Whether an object for `deterministic_id` is currently alive.
    pub fn is_live(&self, deterministic_id: &str) -> bool {
        self.lock().live.contains(deterministic_id)
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Highest number of driver calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Record the call and return the scripted delay for it.
    fn enter(&self, phase: Phase, ctx: &ResourceContext) -> Option<Duration> {
        let mut state = self.lock();
        state.calls.push(DriverCall {
            phase,
            stack: ctx.stack_name.to_string(),
            resource: ctx.name().to_string(),
        });
        state
            .scripts
            .get(ctx.name())
            .and_then(|s| s.delays.get(&phase).copied())
    }

    async fn observe<T>(&self, delay: Option<Duration>, f: impl FnOnce() -> T) -> T {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = f();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl ProvisioningDriver for ScriptedDriver {
    async fn ensure_created(&self, ctx: &ResourceContext) -> DriverResult<ExternalRef> {
        let delay = self.enter(Phase::Create, ctx);
        self.observe(delay, || {
            let mut state = self.lock();
            if let Some(err) = state
                .scripts
                .get_mut(ctx.name())
                .and_then(|s| s.create_failures.pop_front())
            {
                return Err(err);
            }
            state.live.insert(ctx.deterministic_id.clone());
            Ok(format!("ext-{}", ctx.deterministic_id))
        })
        .await
    }

    async fn check_ready(&self, ctx: &ResourceContext) -> DriverResult<Readiness> {
        let delay = self.enter(Phase::Ready, ctx);
        self.observe(delay, || {
            let mut state = self.lock();
            let (failure, until_ready, endpoint) = match state.scripts.get_mut(ctx.name()) {
                Some(s) => (s.check_failures.pop_front(), s.polls_until_ready, s.endpoint.clone()),
                None => (None, 0, None),
            };
            if let Some(err) = failure {
                return Err(err);
            }
            if !state.live.contains(&ctx.deterministic_id) {
                return Err(DriverError::permanent(format!(
                    "{} does not exist",
                    ctx.deterministic_id
                )));
            }

            let polls = state.polls.entry(ctx.deterministic_id.clone()).or_insert(0);
            *polls += 1;
            if *polls <= until_ready {
                return Ok(Readiness::Pending);
            }
            Ok(Readiness::Ready {
                endpoint: Some(
                    endpoint.unwrap_or_else(|| format!("http://{}.test", ctx.deterministic_id)),
                ),
            })
        })
        .await
    }

    async fn destroy(&self, ctx: &ResourceContext) -> DriverResult<()> {
        let delay = self.enter(Phase::Destroy, ctx);
        self.observe(delay, || {
            let mut state = self.lock();
            if let Some(err) = state
                .scripts
                .get_mut(ctx.name())
                .and_then(|s| s.destroy_failures.pop_front())
            {
                return Err(err);
            }
            state.live.remove(&ctx.deterministic_id);
            state.polls.remove(&ctx.deterministic_id);
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
