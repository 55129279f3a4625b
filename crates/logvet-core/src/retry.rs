//! Retry with exponential backoff.
//!
//! Provides a standardized retry policy for the network-facing clients.
//! Retries are scoped per network call, not per test item: a search failure
//! that exhausts its budget degrades the item to the fallback stage instead
//! of retrying the whole pipeline.
//!
//! # Usage
//!
//! ```rust,ignore
//! use logvet_core::retry::{RetryPolicy, with_smart_retry};
//!
//! let policy = RetryPolicy::log_store();
//!
//! let result = with_smart_retry(&policy, || async {
//!     client.fetch_page().await
//! }).await;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{BackendError, Error, LogStoreError, Result};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied to delay after each retry.
    pub backoff_factor: f64,
    /// Random jitter range as percentage (0.1 = ±10%).
    pub jitter_percent: f64,
    /// Maximum number of attempts. None = retry forever (use with caution).
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: Some(3),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with the specified parameters.
    #[must_use]
    pub fn new(
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
        jitter_percent: f64,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_factor: backoff_factor.max(1.0),
            jitter_percent: jitter_percent.clamp(0.0, 1.0),
            max_attempts,
        }
    }

    /// Policy for log store queries: 4 attempts, 2s initial, 16s cap.
    #[must_use]
    pub fn log_store() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(16),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: Some(4),
        }
    }

    /// Policy for search backend queries: 4 attempts, 2s initial, 16s cap.
    #[must_use]
    pub fn search_backend() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(16),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: Some(4),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)] // attempt is capped at 31, safe for i32
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        // Cap exponent to prevent overflow in powi; 31 iterations of 2x is already huge
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms as f64) * self.backoff_factor.powi(exp);
        let base_ms = base_ms.min(max_ms as f64);

        // Apply jitter: ±jitter_percent
        let jitter = if self.jitter_percent > 0.0 {
            let mut rng = rand::rng();
            let jitter_range = base_ms * self.jitter_percent;
            if jitter_range > 0.0 {
                rng.random_range(-jitter_range..=jitter_range)
            } else {
                0.0
            }
        } else {
            0.0
        };

        let delay_ms = (base_ms + jitter).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Execute an async operation with retry and exponential backoff.
///
/// The operation will be retried according to the policy until it succeeds
/// or the maximum number of attempts is exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        total_attempts = attempt + 1,
                        retries = attempt,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;

                if let Some(max) = policy.max_attempts {
                    if attempt >= max {
                        warn!(
                            attempt,
                            max_attempts = max,
                            error = %e,
                            "Operation failed after all retry attempts"
                        );
                        return Err(e);
                    }
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying operation after failure"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Check if an error is retryable.
///
/// Permanent failures (bad queries, malformed responses, configuration
/// problems) are excluded from the retry predicate so backoff budget is only
/// spent on transient network conditions.
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    match error {
        // Transport failures are generally transient
        Error::LogStore(e) => match e {
            LogStoreError::Http(_) => true,
            LogStoreError::Status { status, .. } => is_retryable_status(*status),
        },
        Error::Backend(e) => match e {
            BackendError::Http(_) => true,
            BackendError::Status { status, .. } => is_retryable_status(*status),
            BackendError::InvalidResponse(_) => false, // Structural issue
        },
        // I/O errors are generally retryable (filesystem hiccups)
        Error::Io(_) => true,
        // Runtime errors might be transient
        Error::Runtime(_) => true,
        // Fallback errors are structural (invalid pattern)
        Error::Fallback(_) => false,
        // A corrupt checkpoint or bad config never heals on its own
        Error::Checkpoint(_) => false,
        Error::Config(_) => false,
        // JSON errors are not retryable (structural issue)
        Error::Json(_) => false,
        Error::Report(_) => false,
    }
}

/// Server status codes worth another attempt: throttling and 5xx.
const fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Execute an operation with smart retry (only retries if error is retryable).
pub async fn with_smart_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        total_attempts = attempt + 1,
                        retries = attempt,
                        "Operation succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;

                if !is_retryable(&e) {
                    debug!(
                        attempt,
                        error = %e,
                        "Non-retryable error, giving up"
                    );
                    return Err(e);
                }

                if let Some(max) = policy.max_attempts {
                    if attempt >= max {
                        warn!(
                            attempt,
                            max_attempts = max,
                            error = %e,
                            "Operation failed after all retry attempts"
                        );
                        return Err(e);
                    }
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying operation after retryable failure"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
