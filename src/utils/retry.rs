//! Retry utilities: backoff builders from the retry table.
//!
//! Uses `backon` for exponential backoff with optional jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::config::RetryPolicy;

/// Build an exponential backoff from a retry table row.
///
/// `max_attempts` counts the first attempt, so the builder allows
/// `max_attempts - 1` retries.
pub fn backoff(policy: &RetryPolicy) -> ExponentialBuilder {
    let builder = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(policy.min_delay_ms))
        .with_max_delay(Duration::from_millis(policy.max_delay_ms.max(policy.min_delay_ms)))
        .with_factor(policy.factor.max(1.0))
        .with_max_times(policy.max_retries());

    if policy.jitter {
        builder.with_jitter()
    } else {
        builder
    }
}
