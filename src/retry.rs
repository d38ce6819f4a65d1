//! Retry/backoff executor.
//!
//! Every external call made by the engine runs inside [`with_retry`], which
//! applies a bounded exponential backoff and observes the shared
//! cancellation token before each attempt, during each attempt and during
//! each sleep.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CloudError, ConvergeError, Result, RetryError};

/// Backoff policy for one class of operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    /// Growth factor applied after each attempt.
    pub factor: f64,
    /// Upper bound on a single delay.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Optional bound on the total elapsed time.
    #[serde(rename = "max_elapsed_ms", default, with = "opt_millis")]
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// Default policy for read operations (lookups, listings).
    #[must_use]
    pub const fn read_default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 8,
            max_elapsed: None,
        }
    }

    /// Default policy for write operations (create, update, associate).
    #[must_use]
    pub const fn write_default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            max_elapsed: None,
        }
    }

    /// Policy with no delay between attempts.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            base_delay: Duration::ZERO,
            factor: 1.0,
            max_delay: Duration::ZERO,
            max_attempts,
            max_elapsed: None,
        }
    }

    /// Returns the delay to wait after the given (1-based) failed attempt.
    ///
    /// Delays grow as `base * factor^(attempt - 1)`, capped at `max_delay`,
    /// and never decrease from one attempt to the next.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::read_default()
    }
}

/// Read and write retry policies, threaded through a plan execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicies {
    /// Policy for read operations.
    #[serde(default = "RetryPolicy::read_default")]
    pub read: RetryPolicy,
    /// Policy for write operations.
    #[serde(default = "RetryPolicy::write_default")]
    pub write: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            read: RetryPolicy::read_default(),
            write: RetryPolicy::write_default(),
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The operation completed.
    Done(T),
    /// The operation failed transiently and should be retried.
    Retry(Option<String>),
}

impl<T> Attempt<T> {
    /// Classifies a cloud call result.
    ///
    /// Transient cloud errors become [`Attempt::Retry`]; every other error
    /// is terminal.
    ///
    /// # Errors
    ///
    /// Returns the cloud error if it is not retryable.
    pub fn from_cloud(result: std::result::Result<T, CloudError>) -> Result<Self> {
        match result {
            Ok(value) => Ok(Self::Done(value)),
            Err(e) if e.is_retryable() => Ok(Self::Retry(Some(e.to_string()))),
            Err(e) => Err(ConvergeError::Cloud(e)),
        }
    }
}

/// Runs `op` until it completes, fails terminally, exhausts the policy or
/// is cancelled.
///
/// # Errors
///
/// - the terminal error returned by `op`
/// - `RetryError::Timeout` once the attempt or elapsed budget is exhausted
/// - `RetryError::Cancelled` when `cancel` fires
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;
    let mut attempt = 0_u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::cancelled(operation).into());
        }

        attempt += 1;
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::cancelled(operation).into()),
            outcome = op() => outcome?,
        };

        match outcome {
            Attempt::Done(value) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", operation, attempt);
                }
                return Ok(value);
            }
            Attempt::Retry(reason) => {
                if let Some(reason) = &reason {
                    debug!("{} attempt {} failed: {}", operation, attempt, reason);
                }
                last_error = reason.or(last_error);
            }
        }

        let delay = policy.delay_for(attempt);
        let out_of_time = policy
            .max_elapsed
            .is_some_and(|limit| started.elapsed() + delay > limit);

        if attempt >= max_attempts || out_of_time {
            warn!("{} gave up after {} attempts", operation, attempt);
            return Err(RetryError::Timeout {
                operation: operation.to_owned(),
                attempts: attempt,
                last_error,
            }
            .into());
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::cancelled(operation).into()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation, clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}
