//! Mixtape daemon library
//!
//! This module provides the components behind `mixtaped`:
//! - REST API over the signature consensus engine
//! - Configuration loading and logging bootstrap
//! - Backend wiring and server lifecycle

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use server::Server;
