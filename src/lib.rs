// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Converge
//!
//! A declarative task reconciliation engine for provisioning cloud infrastructure.
//!
//! ## Overview
//!
//! Every infrastructure resource (network, subnet, security group, DNS zone,
//! instance) is a typed **task**. For each reconciliation pass the engine:
//!
//! 1. **Orders** the tasks by the references they declare (cycles are fatal)
//! 2. **Finds** the actual state of every task through the cloud API
//! 3. **Diffs** actual against expected state, field by field
//! 4. **Renders** the delta to the active target: live API calls, a Terraform
//!    JSON configuration, or a `CloudFormation` template
//!
//! Every external call runs inside a bounded exponential-backoff retry loop
//! that observes a shared cancellation token.
//!
//! ## Modules
//!
//! - [`config`]: Cluster spec parsing, validation and hashing
//! - [`task`]: Task model, comparison fields and plan nodes
//! - [`planner`]: Dependency resolution, diffing, execution and reports
//! - [`render`]: Targets, render dispatch and artifact writers
//! - [`retry`]: Retry/backoff executor
//! - [`cloud`]: The opaque cloud API capability and its implementations
//! - [`tasks`]: Built-in resource kinds
//! - [`reconciler`]: Entry point tying a cluster spec to an execution
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   name: demo
//! network:
//!   vpc:
//!     name: main
//!     cidr: 10.0.0.0/16
//!   subnets:
//!     - name: us-east-1a
//!       cidr: 10.0.0.0/20
//!       zone: us-east-1a
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod render;
pub mod retry;
pub mod task;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{CloudApi, CloudObject, MemoryCloud, RestCloudClient};
pub use config::{ClusterSpec, ConfigHasher, ConfigParser, ConfigValidator};
pub use error::{ConvergeError, Result};
pub use planner::{DiffEngine, ExecutionReport, Plan, PlanExecutor, TaskOutcome};
pub use reconciler::Reconciler;
pub use render::{RenderDispatcher, Target};
pub use retry::{Attempt, RetryPolicies, RetryPolicy};
pub use task::{Lifecycle, TaskKey, TaskKind};
