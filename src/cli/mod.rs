//! CLI module for the converge tool.
//!
//! This module provides the command-line interface for validating,
//! planning and applying cluster specs.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat};
pub use output::OutputFormatter;
