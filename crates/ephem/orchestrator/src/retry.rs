//! Exponential backoff with jitter for driver calls.
//!
//! Every call runs under [`RetryPolicy::call_timeout`]; an expired timeout
//! counts as a transient failure. Transient failures and pending readiness
//! polls are retried until the attempt budget or the wall-clock window runs
//! out. Permanent failures stop immediately.

use ephem_driver::{DriverError, DriverResult};
use ephem_types::{FailureKind, OperationFailure, Phase};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff and budget for one provisioning phase of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Maximum calls per phase (0 = bounded by `max_elapsed` only)
    pub max_attempts: u32,
    /// Wall-clock window per phase
    pub max_elapsed: Duration,
    /// Caller-enforced limit on a single driver call
    pub call_timeout: Duration,
    /// Scale each delay by a random factor in 0.5..1.5
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 30,
            max_elapsed: Duration::from_secs(15 * 60),
            call_timeout: Duration::from_secs(120),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            attempts: 0,
            delay: self.initial_backoff,
            started: Instant::now(),
        }
    }
}

/// Delay sequence for one retry loop.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    delay: Duration,
    started: Instant,
}

impl Backoff<'_> {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record an unsuccessful attempt and return how long to wait before the
    /// next one, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.policy.max_attempts > 0 && self.attempts >= self.policy.max_attempts {
            return None;
        }
        let elapsed = self.started.elapsed();
        if elapsed >= self.policy.max_elapsed {
            return None;
        }

        let base = self.delay;
        self.delay = Duration::from_secs_f64(
            (base.as_secs_f64() * self.policy.multiplier).min(self.policy.max_backoff.as_secs_f64()),
        );

        let delay = if self.policy.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            Duration::from_secs_f64(base.as_secs_f64() * factor)
        } else {
            base
        };
        Some(delay.min(self.policy.max_elapsed - elapsed))
    }
}

/// Outcome of one successful driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    Done(T),
    /// Not there yet; poll again after backoff.
    Pending,
}

/// Why a retry loop gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    Permanent(DriverError),
    Exhausted {
        attempts: u32,
        last: Option<DriverError>,
    },
    Cancelled,
}

impl RetryError {
    /// The failure to record against `resource`, or `None` when cancelled.
    pub fn into_failure(self, resource: &str, phase: Phase) -> Option<OperationFailure> {
        match self {
            RetryError::Permanent(err) => Some(OperationFailure::new(
                resource,
                phase,
                FailureKind::Permanent,
                err.message(),
            )),
            RetryError::Exhausted { attempts, last } => {
                let message = match last {
                    Some(err) => format!("gave up after {} attempts: {}", attempts, err.message()),
                    None => format!("not ready after {} attempts", attempts),
                };
                Some(OperationFailure::new(resource, phase, FailureKind::Transient, message))
            }
            RetryError::Cancelled => None,
        }
    }
}

/// Drive `call` until it is done, fails permanently, exhausts the policy or
/// is cancelled.
pub async fn retry_driver_call<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut call: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DriverResult<Step<T>>>,
{
    let mut backoff = policy.backoff();
    let mut last = None;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = tokio::time::timeout(policy.call_timeout, call()) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(DriverError::transient(format!(
                    "{} timed out after {:?}",
                    operation, policy.call_timeout
                ))),
            },
        };

        match outcome {
            Ok(Step::Done(value)) => return Ok(value),
            Ok(Step::Pending) => {
                debug!(operation = %operation, attempt = backoff.attempts() + 1, "Not ready yet");
            }
            Err(err) if err.is_transient() => {
                warn!(
                    operation = %operation,
                    attempt = backoff.attempts() + 1,
                    error = %err,
                    "Driver call failed, retrying"
                );
                last = Some(err);
            }
            Err(err) => return Err(RetryError::Permanent(err)),
        }

        let Some(delay) = backoff.next_delay() else {
            warn!(operation = %operation, attempts = backoff.attempts(), "Retry budget exhausted");
            return Err(RetryError::Exhausted {
                attempts: backoff.attempts(),
                last,
            });
        };
        debug!(operation = %operation, delay_ms = delay.as_millis() as u64, "Backing off");

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
