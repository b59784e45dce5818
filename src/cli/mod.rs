//! Command-line interface for rigforge.
//!
//! Provides commands to run, inspect, retry and skip workflow stages, and to
//! list the configured pipeline.

mod commands;
mod signal;

pub use commands::{exit_code, parse_cli, run_with_cli, Cli, Commands};
