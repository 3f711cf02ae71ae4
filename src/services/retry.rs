//! Retry policy for non-destructive operations
//!
//! Probe, fingerprint, and enrichment calls may hit transient failures (a
//! busy share mount, a slow external catalog) and are worth a few more
//! attempts. Destructive operations (stage move, approve unlink) must never
//! come through here.

use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use tracing::debug;

/// How many extra attempts an operation gets, and how they are spaced
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first failure; 0 disables retrying
    pub max_retries: u32,
    /// Delay before the first retry
    pub first_delay: Duration,
    /// Ceiling on the growing delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            first_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Run `attempt` until it succeeds or the policy is exhausted
///
/// The final error is returned as-is; intermediate failures are logged at
/// debug level with the delay chosen before the next attempt.
pub async fn with_retries<T, E, Fut, F>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delays = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.first_delay)
        .with_max_interval(policy.max_delay)
        .with_max_elapsed_time(None)
        .build();
    let mut retries_left = policy.max_retries;

    loop {
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if retries_left == 0 {
            return Err(err);
        }
        retries_left -= 1;

        // next_backoff only returns None past max_elapsed_time, which the
        // builder leaves unbounded; the retry budget is the counter above
        let delay = delays.next_backoff().unwrap_or(policy.max_delay);
        debug!(
            operation = operation,
            retries_left = retries_left,
            delay_ms = delay.as_millis() as u64,
            cause = %err,
            "Transient failure, will retry"
        );
        tokio::time::sleep(delay).await;
    }
}
