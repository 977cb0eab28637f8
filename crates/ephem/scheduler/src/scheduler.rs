//! Expiry sweep loop

use crate::error::ScheduleResult;
use chrono::{DateTime, Utc};
use ephem_orchestrator::{Orchestrator, OrchestratorError};
use ephem_types::ErrorKind;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub max_concurrent_teardowns: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_concurrent_teardowns: 4,
        }
    }
}

impl SchedulerConfig {
    /// Clamp to the supported minimums (1s interval, one teardown at a time).
    pub fn normalized(self) -> Self {
        Self {
            poll_interval: self.poll_interval.max(MIN_POLL_INTERVAL),
            max_concurrent_teardowns: self.max_concurrent_teardowns.max(1),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired stacks found
    pub expired: usize,
    pub destroyed: Vec<String>,
    /// Teardown attempted but not finished; retried next tick
    pub pending: Vec<String>,
    /// Held by another operation; retried next tick
    pub busy: Vec<String>,
}

/// Periodic teardown of expired stacks.
pub struct TeardownScheduler {
    orchestrator: Orchestrator,
    config: SchedulerConfig,
    trigger_tx: mpsc::Sender<()>,
}

impl TeardownScheduler {
    /// Create a scheduler; the receiver feeds [`TeardownScheduler::run`].
    pub fn new(
        orchestrator: Orchestrator,
        config: SchedulerConfig,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let scheduler = Arc::new(Self {
            orchestrator,
            config: config.normalized(),
            trigger_tx,
        });
        (scheduler, trigger_rx)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Request an immediate sweep. Requests made while one is pending
    /// coalesce.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Sweep on every tick and trigger until cancelled.
    pub async fn run(self: Arc<Self>, mut trigger_rx: mpsc::Receiver<()>, cancel: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_concurrent = self.config.max_concurrent_teardowns,
            "Teardown scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                Some(_) = trigger_rx.recv() => {
                    debug!("Sweep triggered");
                }
            }

            if let Err(e) = self.sweep_with(Utc::now(), &cancel).await {
                error!(error = %e, "Teardown sweep failed");
            }
        }

        info!("Teardown scheduler stopped");
    }

    /// One sweep over the stacks expired at `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> ScheduleResult<SweepReport> {
        self.sweep_with(now, &CancellationToken::new()).await
    }

    async fn sweep_with(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ScheduleResult<SweepReport> {
        let expired = self.orchestrator.store().list_expired(now).await?;
        let mut report = SweepReport {
            expired: expired.len(),
            ..Default::default()
        };
        if expired.is_empty() {
            return Ok(report);
        }
        debug!(count = expired.len(), "Expired stacks found");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_teardowns));
        let handles: Vec<_> = expired
            .into_iter()
            .map(|stack| {
                let orchestrator = self.orchestrator.clone();
                let semaphore = semaphore.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => orchestrator.teardown(&stack.name, &cancel).await,
                        Err(_) => Err(OrchestratorError::Cancelled(stack.name.to_string())),
                    };
                    (stack.name, result)
                })
            })
            .collect();

        for joined in join_all(handles).await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Teardown task panicked");
                    continue;
                }
            };
            match result {
                Ok(_) => {
                    info!(stack = %name, "Expired stack destroyed");
                    report.destroyed.push(name.to_string());
                }
                Err(e) if e.kind() == ErrorKind::Busy => {
                    debug!(stack = %name, "Stack busy, retrying next tick");
                    report.busy.push(name.to_string());
                }
                Err(e) => {
                    warn!(stack = %name, error = %e, "Teardown of expired stack did not finish");
                    report.pending.push(name.to_string());
                }
            }
        }

        report.destroyed.sort();
        report.pending.sort();
        report.busy.sort();
        Ok(report)
    }
}
