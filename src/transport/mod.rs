// Retry loop shared by the blocking HTTP clients


use anyhow::{Result, anyhow};
use std::time::Duration;
use tracing::{debug, error, warn};

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// `retries` additional attempts after the first one
    #[inline]
    pub fn with_retries(retries: u32) -> Self {
        Self {
            attempts: retries.saturating_add(1),
            ..Self::default()
        }
    }

    #[inline]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Whether a failed request is worth repeating
#[inline]
pub fn is_retryable(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::StatusCode(status) => *status >= 500 || *status == 429,
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => true,
        _ => false,
    }
}

/// Run a blocking request, retrying transient failures with exponential backoff.
///
/// Must be called from a blocking context; the backoff sleeps the thread.
#[inline]
pub fn send_with_retry<T, F>(policy: RetryPolicy, target: &str, mut request_fn: F) -> Result<T>
where
    F: FnMut() -> Result<T, ureq::Error>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        debug!("HTTP request attempt {}/{} to {}", attempt, attempts, target);

        match request_fn() {
            Ok(value) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    warn!("Non-retryable error from {}: {}", target, err);
                    return Err(match err {
                        ureq::Error::StatusCode(status) => anyhow!("HTTP {} from {}", status, target),
                        other => anyhow!("Request to {} failed: {}", target, other),
                    });
                }

                warn!(
                    "Transient error from {}: {}, attempt {}/{}",
                    target, err, attempt, attempts
                );
                last_error = Some(anyhow!("Request error: {}", err));

                if attempt < attempts {
                    let delay = policy.delay_for(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for request to {}", target);
    Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
}
