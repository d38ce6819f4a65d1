//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ClusterSpec, ValidationResult};
use crate::planner::{ExecutionReport, ReportEntry, TaskOutcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Task row for table display.
#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Changes")]
    changes: String,
    #[tabled(rename = "Time")]
    duration: String,
}

/// JSON view of a validation result.
#[derive(Serialize)]
struct ValidationJson<'a> {
    cluster: &'a str,
    valid: bool,
    errors: Vec<String>,
    warnings: &'a [String],
    tasks: usize,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats an execution report for display.
    #[must_use]
    pub fn format_report(&self, report: &ExecutionReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    /// Formats a report as text.
    fn format_report_text(report: &ExecutionReport) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\nTarget: {}", report.target.to_string().bold());
        if let Some(hash) = &report.spec_hash {
            let _ = writeln!(output, "Spec hash: {}", Self::truncate(hash, 8));
        }
        output.push('\n');

        if report.entries.is_empty() {
            output.push_str("   No tasks.\n");
            return output;
        }

        let rows: Vec<TaskRow> = report
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| Self::task_row(i + 1, entry))
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nSummary: {} created, {} updated, {} unchanged, {} skipped, {} failed ({} ms)\n",
            report.created().to_string().green(),
            report.updated().to_string().yellow(),
            report.unchanged(),
            report.skipped(),
            report.failed().to_string().red(),
            report.duration_ms()
        );

        if report.success() && !report.has_changes() {
            let _ = writeln!(output, "{} Infrastructure is up to date.", "✓".green());
        } else if !report.success() {
            let _ = writeln!(output, "\n{} Failures:", "✗".red());
            for entry in report.entries.iter().filter(|e| !e.outcome.is_success()) {
                let _ = writeln!(output, "   - {}: {}", entry.key, entry.outcome);
            }
        }

        output
    }

    fn task_row(index: usize, entry: &ReportEntry) -> TaskRow {
        TaskRow {
            index,
            task: entry.key.to_string(),
            outcome: Self::format_outcome(&entry.outcome),
            changes: Self::truncate(&entry.changes.join(", "), 50),
            duration: format!("{} ms", entry.duration_ms),
        }
    }

    /// Formats a task outcome with color.
    fn format_outcome(outcome: &TaskOutcome) -> String {
        match outcome {
            TaskOutcome::Created => "+created".green().to_string(),
            TaskOutcome::Updated => "~updated".yellow().to_string(),
            TaskOutcome::NoChange => "no-change".dimmed().to_string(),
            TaskOutcome::SkippedPolicy => "skipped".cyan().to_string(),
            TaskOutcome::Failed(_) => "failed".red().to_string(),
        }
    }

    /// Formats a validation result for display.
    #[must_use]
    pub fn format_validation(
        &self,
        spec: &ClusterSpec,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let view = ValidationJson {
                    cluster: &spec.cluster.name,
                    valid: result.is_valid(),
                    errors: result.errors.iter().map(ToString::to_string).collect(),
                    warnings: &result.warnings,
                    tasks: spec.task_count(),
                };
                serde_json::to_string_pretty(&view).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_validation_text(spec, result, show_warnings),
        }
    }

    fn format_validation_text(
        spec: &ClusterSpec,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        let mut output = String::new();

        if result.is_valid() {
            let _ = writeln!(output, "{} Cluster spec is valid", "✓".green());
        } else {
            let _ = writeln!(
                output,
                "{} Cluster spec has {} error(s):",
                "✗".red(),
                result.error_count()
            );
            for error in &result.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }

        if show_warnings && !result.warnings.is_empty() {
            let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        let _ = writeln!(output, "\nCluster: {}", spec.cluster.name);
        let _ = writeln!(output, "   Region: {}", spec.cloud.region);
        let _ = writeln!(output, "   Subnets: {}", spec.network.subnets.len());
        let _ = writeln!(output, "   Security groups: {}", spec.security_groups.len());
        let _ = writeln!(output, "   Instances: {}", spec.instances.len());
        let _ = writeln!(output, "   Tasks: {}", spec.task_count());

        output
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, ConfigValidator};
    use crate::planner::FailureReason;
    use crate::render::Target;
    use crate::task::TaskKey;
    use chrono::Utc;

    fn report(outcomes: Vec<(TaskKey, TaskOutcome)>) -> ExecutionReport {
        ExecutionReport {
            target: Target::DryRun,
            spec_hash: Some(String::from("0123456789abcdef")),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            entries: outcomes
                .into_iter()
                .map(|(key, outcome)| ReportEntry {
                    key,
                    outcome,
                    changes: vec![String::from("Tags")],
                    duration_ms: 3,
                })
                .collect(),
            artifact: None,
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("hello", 10), "hello");
        assert_eq!(OutputFormatter::truncate("hello world", 8), "hello...");
    }

    #[test]
    fn test_text_report_lists_failures() {
        colored::control::set_override(false);
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let report = report(vec![
            (TaskKey::new("vpc", "main"), TaskOutcome::Updated),
            (
                TaskKey::new("subnet", "a"),
                TaskOutcome::Failed(FailureReason::Error(String::from("boom"))),
            ),
        ]);

        let text = formatter.format_report(&report);

        assert!(text.contains("dry-run"));
        assert!(text.contains("01234567"));
        assert!(text.contains("vpc/main"));
        assert!(text.contains("subnet/a: failed: boom"));
    }

    #[test]
    fn test_json_report() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let report = report(vec![(TaskKey::new("vpc", "main"), TaskOutcome::Created)]);

        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_report(&report)).expect("json");

        assert_eq!(json["target"], "dry-run");
        assert_eq!(json["entries"][0]["outcome"]["status"], "created");
    }

    #[test]
    fn test_json_validation() {
        let spec = ConfigParser::new()
            .parse_yaml(
                "cluster:\n  name: demo\nnetwork:\n  vpc:\n    name: main\n    cidr: 10.0.0.0/16\n",
                None,
            )
            .expect("parse");
        let result = ConfigValidator::new().check(&spec);
        let formatter = OutputFormatter::new(OutputFormat::Json);

        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_validation(&spec, &result, true)).expect("json");

        assert_eq!(json["cluster"], "demo");
        assert_eq!(json["tasks"], 1);
    }
}
