//! Configuration for ephem-daemon

use crate::error::{DaemonError, DaemonResult};
use ephem_doctor::DoctorConfig;
use ephem_driver::HookCommands;
use ephem_orchestrator::RetryPolicy;
use ephem_scheduler::SchedulerConfig;
use ephem_types::Provider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Backoff and budget for driver calls
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub doctor: DoctorConfig,

    /// Hook commands keyed by provider name (`local-cluster`, `gcp`, `aws`)
    #[serde(default)]
    pub drivers: BTreeMap<String, HookCommands>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            enable_cors: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// SQLite database file
    Sqlite {
        path: PathBuf,

        #[serde(default = "default_pool_size")]
        max_connections: u32,
    },
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_teardowns: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            max_concurrent_teardowns: default_max_concurrent(),
        }
    }
}

impl SchedulerSettings {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_concurrent_teardowns: self.max_concurrent_teardowns,
        }
        .normalized()
    }
}

/// Retry configuration, in whole milliseconds and seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub max_elapsed_secs: u64,
    pub call_timeout_secs: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
            max_attempts: policy.max_attempts,
            max_elapsed_secs: policy.max_elapsed.as_secs(),
            call_timeout_secs: policy.call_timeout.as_secs(),
            jitter: policy.jitter,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms.max(1)),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            multiplier: if self.multiplier < 1.0 { 1.0 } else { self.multiplier },
            max_attempts: self.max_attempts,
            max_elapsed: Duration::from_secs(self.max_elapsed_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs.max(1)),
            jitter: self.jitter,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    5
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `EPHEM_`
    /// environment variables (`EPHEM_SERVER__LISTEN_ADDR`, ...).
    pub fn load(path: Option<&Path>) -> DaemonResult<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("EPHEM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Configured hook drivers with their provider names parsed.
    pub fn hook_drivers(&self) -> DaemonResult<Vec<(Provider, HookCommands)>> {
        self.drivers
            .iter()
            .map(|(name, commands)| {
                let provider: Provider = name
                    .parse()
                    .map_err(|e| DaemonError::Config(format!("drivers.{}: {}", name, e)))?;
                if commands.create.is_empty() || commands.destroy.is_empty() {
                    return Err(DaemonError::Config(format!(
                        "drivers.{}: create and destroy commands are required",
                        name
                    )));
                }
                Ok((provider, commands.clone()))
            })
            .collect()
    }
}
