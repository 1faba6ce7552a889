//! Execution limits and retry tables.
//!
//! Retries are table-driven: each policy row gives the attempt budget and
//! the exponential backoff schedule, and `utils::retry` turns a row into a
//! `backon` builder.

use std::time::Duration;

use serde::Deserialize;

/// Timeouts and concurrency limits for saga execution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Default timeout for a single participant call.
    pub step_timeout_ms: u64,
    /// Overall deadline for the forward phase of a saga. None = no deadline.
    pub saga_timeout_secs: Option<u64>,
    /// Maximum number of sagas driving steps at the same time.
    pub max_concurrent_sagas: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            saga_timeout_secs: None,
            max_concurrent_sagas: 256,
        }
    }
}

impl ExecutionConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn saga_timeout(&self) -> Option<Duration> {
        self.saga_timeout_secs.map(Duration::from_secs)
    }
}

/// One row of the retry table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. 1 = no retries.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub min_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
    /// Multiplier between consecutive delays.
    pub factor: f32,
    /// Randomize delays to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 100,
            max_delay_ms: 5_000,
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Millisecond delays without jitter, for tests and local runs.
    pub fn fast(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_delay_ms: 1,
            max_delay_ms: 5,
            factor: 2.0,
            jitter: false,
        }
    }

    /// Retries after the first attempt.
    pub fn max_retries(&self) -> usize {
        self.max_attempts.saturating_sub(1) as usize
    }
}

/// Retry tables by operation kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Transient failures of forward steps.
    pub step: RetryPolicy,
    /// Failures of inverse actions.
    pub compensation: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            step: RetryPolicy::default(),
            compensation: RetryPolicy {
                max_attempts: 8,
                ..RetryPolicy::default()
            },
        }
    }
}
