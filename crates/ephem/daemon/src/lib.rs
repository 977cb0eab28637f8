//! Ephem Daemon library
//!
//! This module provides the core components for the ephem daemon:
//! - REST API handlers
//! - Configuration loading
//! - Server lifecycle management

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod server;

pub use api::{create_router, AppState};
pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
