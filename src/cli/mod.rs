//! CLI-specific functionality for the sync client
//!
//! This module contains argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, Commands, ExecutionMode, SimulateConfig};
pub use config::{ClientConfig, ConfigDiscovery, ConfigError};
