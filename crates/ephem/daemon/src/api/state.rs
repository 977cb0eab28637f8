//! Application state for API handlers

use ephem_doctor::DoctorConfig;
use ephem_orchestrator::{CancellationToken, Orchestrator};
use ephem_scheduler::{TeardownScheduler, TeardownSchedules};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,

    /// Deadline view over the same store
    pub schedules: TeardownSchedules,

    pub scheduler: Arc<TeardownScheduler>,

    /// Settings for on-demand doctor runs
    pub doctor: DoctorConfig,

    /// Cancelled on shutdown; in-flight deploys and teardowns stop at their
    /// next retry point
    pub shutdown: CancellationToken,

    pub version: String,

    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator,
        scheduler: Arc<TeardownScheduler>,
        doctor: DoctorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            schedules: TeardownSchedules::new(orchestrator.store().clone()),
            orchestrator,
            scheduler,
            doctor,
            shutdown,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
