//! Ephem Daemon - ephemeral stack orchestration service
//!
//! The ephem daemon provides:
//! - REST API for deploying, inspecting and tearing down stacks
//! - Teardown scheduler enforcing stack deadlines
//! - Provider doctor checks

use clap::{Parser, Subcommand};
use ephem_daemon::config::DaemonConfig;
use ephem_daemon::error::{DaemonError, DaemonResult};
use ephem_daemon::Server;
use ephem_doctor::Doctor;
use ephem_types::Provider;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ephem Daemon CLI
#[derive(Parser)]
#[command(name = "ephemd")]
#[command(about = "Ephem Daemon - ephemeral ML stack orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EPHEM_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Listen address (overrides server.listen_addr)
    #[arg(short, long, env = "EPHEM_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level (overrides logging.level)
    #[arg(long, env = "EPHEM_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "EPHEM_LOG_JSON", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API and run the teardown scheduler (default)
    Serve,

    /// Check this machine is ready to provision against a provider
    Doctor {
        /// Provider to check (local-cluster, gcp, aws)
        #[arg(short, long, default_value = "local-cluster")]
        provider: String,
    },
}

#[tokio::main]
async fn main() -> DaemonResult<ExitCode> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json;

    init_tracing(&config.logging.level, config.logging.json);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            println!(
                r#"
   ___ _ __ | |__   ___ _ __ ___
  / _ \ '_ \| '_ \ / _ \ '_ ` _ \
 |  __/ |_) | | | |  __/ | | | | |
  \___| .__/|_| |_|\___|_| |_| |_|
      |_|

  Ephemeral ML stacks, torn down on time
  Version: {}
  Listening: {}
"#,
                env!("CARGO_PKG_VERSION"),
                config.server.listen_addr
            );

            let server = Server::new(config).await?;
            server.run().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Doctor { provider } => {
            let provider: Provider = provider
                .parse()
                .map_err(|e| DaemonError::Config(format!("{}", e)))?;
            let report = Doctor::for_provider(provider, &config.doctor)?
                .run_doctor()
                .await;
            println!("{}", report);

            if report.has_failures() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
