//! Bounded exponential-backoff retry for remote calls.
//!
//! Wraps any idempotent remote operation in a retry loop: transient
//! failures (network errors, timeouts, 429, 5xx) are retried with
//! exponential backoff, terminal failures propagate immediately.

use std::future::Future;
use std::time::Duration;

use super::error::ApiError;

/// Retry behavior for remote calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
    /// Upper bound on a single backoff delay.
    pub max_delay: Duration,
    /// Randomize each delay within [delay/2, delay].
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before the given retry (1-indexed): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .saturating_mul(exp)
            .min(self.max_delay);
        if self.jitter {
            let millis = delay.as_millis() as u64;
            let jittered = millis / 2 + rand::random::<u64>() % (millis / 2 + 1);
            Duration::from_millis(jittered)
        } else {
            delay
        }
    }
}

/// Error from a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Every attempt failed with a transient error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: ApiError,
    },
    /// A terminal failure, surfaced without retrying.
    #[error(transparent)]
    Fatal(#[from] ApiError),
}

impl RetryError {
    /// The underlying API error, whichever way the retry loop ended.
    pub fn api_error(&self) -> &ApiError {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(err) => err,
        }
    }
}

/// Executes remote operations with automatic retry for transient errors.
#[derive(Debug, Clone, Default)]
pub struct Retrier {
    config: RetryConfig,
}

impl Retrier {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds, fails terminally, or retries are exhausted.
    ///
    /// A server-provided Retry-After hint takes precedence over the computed
    /// backoff delay. `label` names the operation in logs.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut failures = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if failures > 0 {
                        tracing::info!("{} succeeded after {} retries", label, failures);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !error.is_transient() {
                        tracing::error!("{} failed (non-retryable): {}", label, error);
                        return Err(RetryError::Fatal(error));
                    }
                    failures += 1;
                    if failures > self.config.max_retries {
                        tracing::error!(
                            "{} failed after {} attempts: {}",
                            label,
                            failures,
                            error
                        );
                        return Err(RetryError::Exhausted {
                            attempts: failures,
                            last: error,
                        });
                    }
                    let delay = error
                        .retry_after
                        .unwrap_or_else(|| self.config.delay_for(failures));
                    tracing::warn!(
                        "{} failed ({}), retry {} of {} in {:?}",
                        label,
                        error,
                        failures,
                        self.config.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
