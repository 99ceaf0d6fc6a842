use backoff::backoff::Backoff;
use backoff::future::retry;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay; the delay before attempt `n` (0-based) is `interval * n`.
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Create a linear backoff from this configuration
    pub fn to_backoff(&self) -> LinearBackoff {
        LinearBackoff {
            interval: self.interval,
            max_attempts: self.max_attempts.max(1),
            attempt: 0,
        }
    }
}

/// Waits `interval`, then `2 * interval`, ... until `max_attempts` is reached.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    interval: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            None
        } else {
            Some(self.interval * self.attempt)
        }
    }
}

/// Statuses that will not succeed on replay: bad input, not found, unprocessable.
pub fn is_terminal_status(status: u16) -> bool {
    matches!(status, 400 | 404 | 422)
}

/// Execute an async operation with retry logic.
///
/// The operation classifies its own failures: `backoff::Error::Permanent`
/// stops immediately, `backoff::Error::Transient` is retried until the
/// attempts run out. Either way the last error is returned.
pub async fn with_retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, backoff::Error<E>>>,
    E: fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    retry(config.to_backoff(), || {
        attempt += 1;
        let current = attempt;
        let op = operation();

        async move {
            match op.await {
                Ok(result) => {
                    if current > 1 {
                        debug!("{} succeeded on attempt {}", operation_name, current);
                    }
                    Ok(result)
                }
                Err(backoff::Error::Permanent(e)) => {
                    debug!("{} failed permanently: {}", operation_name, e);
                    Err(backoff::Error::Permanent(e))
                }
                Err(backoff::Error::Transient { err, retry_after }) => {
                    if current < max_attempts {
                        warn!(
                            "{} failed on attempt {} of {}: {}. Retrying...",
                            operation_name, current, max_attempts, err
                        );
                    } else {
                        warn!(
                            "{} failed after {} attempts: {}",
                            operation_name, max_attempts, err
                        );
                    }
                    Err(backoff::Error::Transient { err, retry_after })
                }
            }
        }
    })
    .await
}
