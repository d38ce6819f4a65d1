//! Error types for the Converge reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation pass: configuration, plan construction, per-task
//! validation and rendering, cloud API calls, retries and artifact output.

use std::path::PathBuf;
use thiserror::Error;

use crate::render::Target;
use crate::task::TaskKey;

/// The main error type for the Converge engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plan construction and ordering errors.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Errors scoped to a single task.
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Cloud API errors.
    #[error("Cloud API error: {0}")]
    Cloud(#[from] CloudError),

    /// Retry budget and cancellation errors.
    #[error("{0}")]
    Retry(#[from] RetryError),

    /// Artifact assembly and serialization errors.
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The cluster spec file was not found.
    #[error("Cluster spec not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The cluster spec could not be parsed.
    #[error("Failed to parse cluster spec: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Cluster spec validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource (subnet, security group, ...).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// A resource refers to another resource that is not defined.
    #[error("{field} refers to unknown {resource_type} '{name}'")]
    UnknownReference {
        /// Type of the referenced resource.
        resource_type: String,
        /// Name that could not be resolved.
        name: String,
        /// Field holding the reference.
        field: String,
    },
}

/// Plan construction and ordering errors.
///
/// All of these are fatal to the whole plan and are raised before any
/// external state is touched.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {}", format_cycle(.cycle))]
    Cycle {
        /// Tasks forming the cycle, first task repeated at the end.
        cycle: Vec<TaskKey>,
    },

    /// Two tasks share the same identity key.
    #[error("Duplicate task in plan: {key}")]
    DuplicateTask {
        /// The duplicated key.
        key: TaskKey,
    },

    /// A task references a task that is not part of the plan.
    #[error("Task {task} depends on {dependency}, which is not part of the plan")]
    MissingDependency {
        /// The referencing task.
        task: TaskKey,
        /// The missing dependency.
        dependency: TaskKey,
    },
}

/// Errors that are fatal to a single task (and its dependents).
#[derive(Debug, Error)]
pub enum TaskError {
    /// Required field missing or a policy-gated difference.
    #[error("Validation failed for {task}: {message}")]
    Validation {
        /// The failing task.
        task: TaskKey,
        /// Description of the failure.
        message: String,
    },

    /// The task kind has no renderer for the active target.
    #[error("Task kind '{kind}' does not support the {target} target")]
    UnsupportedTarget {
        /// Task kind name.
        kind: &'static str,
        /// Active target.
        target: Target,
    },

    /// The target cannot safely perform the requested operation.
    #[error("Unsupported operation for {task} on the {target} target: {message}")]
    UnsupportedOperation {
        /// The failing task.
        task: TaskKey,
        /// Active target.
        target: Target,
        /// Description of the unsupported operation.
        message: String,
    },

    /// A natural-key lookup matched more than one remote resource.
    #[error("Lookup for {task} matched {matches} resources")]
    AmbiguousLookup {
        /// The task being looked up.
        task: TaskKey,
        /// Number of matches.
        matches: usize,
    },

    /// A dependency has no resolved identity when one is required.
    #[error("{task} requires the identity of {dependency}, which is not resolved")]
    MissingIdentity {
        /// The task that needs the identity.
        task: TaskKey,
        /// The dependency without an identity.
        dependency: TaskKey,
    },
}

/// Cloud API errors.
///
/// "Not found" is never an error: lookups return `Ok(None)` instead.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("Network error: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response from API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Retry executor errors.
#[derive(Debug, Error)]
pub enum RetryError {
    /// The retry budget was exhausted.
    #[error("Timeout: {operation} did not complete after {attempts} attempts{}", last_error_suffix(.last_error))]
    Timeout {
        /// Operation description.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last transient failure reported by the operation.
        last_error: Option<String>,
    },

    /// The overarching cancellation token fired.
    #[error("Cancelled: {operation}")]
    Cancelled {
        /// Operation description.
        operation: String,
    },
}

/// Artifact assembly and serialization errors.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// A declaration references a task that was neither declared nor resolved.
    #[error("{from} references {to}, which has no declaration and no identity")]
    DanglingReference {
        /// The referencing task.
        from: TaskKey,
        /// The referenced task.
        to: TaskKey,
    },

    /// Two declarations share a resource type and name.
    #[error("Duplicate declaration {resource_type}.{name}")]
    DuplicateDeclaration {
        /// Resource type.
        resource_type: String,
        /// Resource name.
        name: String,
    },

    /// Serialization error.
    #[error("Artifact serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },
}

/// Result type alias for Converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

fn format_cycle(cycle: &[TaskKey]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map_or_else(String::new, |e| format!(" (last error: {e})"))
}

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Cloud(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error was caused by cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Retry(RetryError::Cancelled { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl TaskError {
    /// Creates a validation error for a task.
    #[must_use]
    pub fn validation(task: &TaskKey, message: impl Into<String>) -> Self {
        Self::Validation {
            task: task.clone(),
            message: message.into(),
        }
    }

    /// Creates a required-field validation error.
    #[must_use]
    pub fn required_field(task: &TaskKey, field: &str) -> Self {
        Self::validation(task, format!("field '{field}' is required"))
    }

    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported_operation(task: &TaskKey, target: Target, message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            task: task.clone(),
            target,
            message: message.into(),
        }
    }
}

impl CloudError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true for transient failures: rate limiting, network errors
    /// and server-side (5xx) failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::NetworkError { .. } => true,
            Self::ApiRequestFailed { status, .. } => *status >= 500,
            Self::AuthenticationFailed { .. } | Self::InvalidResponse { .. } => false,
        }
    }
}

impl RetryError {
    /// Creates a cancellation error for an operation.
    #[must_use]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = PlanError::Cycle {
            cycle: vec![
                TaskKey::new("vpc", "a"),
                TaskKey::new("subnet", "b"),
                TaskKey::new("vpc", "a"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: vpc/a -> subnet/b -> vpc/a"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CloudError::RateLimited { retry_after_secs: 1 }.is_retryable());
        assert!(CloudError::network("reset").is_retryable());
        assert!(CloudError::api_error(503, "unavailable").is_retryable());
        assert!(!CloudError::api_error(400, "bad request").is_retryable());
        assert!(!ConvergeError::internal("boom").is_retryable());
    }

    #[test]
    fn test_timeout_display_includes_last_error() {
        let err = RetryError::Timeout {
            operation: String::from("find vpc/main"),
            attempts: 3,
            last_error: Some(String::from("rate limited")),
        };
        assert_eq!(
            err.to_string(),
            "Timeout: find vpc/main did not complete after 3 attempts (last error: rate limited)"
        );
        assert!(ConvergeError::from(RetryError::cancelled("x")).is_cancelled());
    }
}
