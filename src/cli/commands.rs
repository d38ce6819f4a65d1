//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::render::Target;

/// Converge - Declarative cloud infrastructure reconciliation.
#[derive(Parser, Debug)]
#[command(name = "converge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the cluster spec.
    #[arg(short, long, global = true, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text", env = "CONVERGE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter cluster spec.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the cluster spec.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the changes a live apply would make.
    Plan,

    /// Reconcile the cloud, or render it as code.
    Apply {
        /// Where to render the plan.
        #[arg(short, long, default_value = "live")]
        target: Target,

        /// Directory for rendered artifacts.
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per log event.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_defaults_to_live() {
        let cli = Cli::try_parse_from(["converge", "apply"]).expect("parse");

        match cli.command {
            Commands::Apply { target, out, yes } => {
                assert_eq!(target, Target::Live);
                assert_eq!(out, PathBuf::from("."));
                assert!(!yes);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_apply_terraform_with_global_flags() {
        let cli = Cli::try_parse_from([
            "converge",
            "apply",
            "--target",
            "terraform",
            "--out",
            "build",
            "-y",
            "--output",
            "json",
            "-c",
            "infra/cluster.yaml",
        ])
        .expect("parse");

        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("infra/cluster.yaml")));
        assert!(matches!(
            cli.command,
            Commands::Apply { target: Target::Terraform, yes: true, .. }
        ));
    }

    #[test]
    fn test_unknown_target_rejected() {
        assert!(Cli::try_parse_from(["converge", "apply", "--target", "pulumi"]).is_err());
    }
}
