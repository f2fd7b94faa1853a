//! Command-line interface for course-forge.
//!
//! Provides commands for job administration, stage enqueueing, worker pools
//! and offline artifact validation.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, OutputFormat};
