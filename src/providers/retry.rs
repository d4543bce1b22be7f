//! Retry contract for outbound calls: bounded attempts with exponential backoff.

use std::future::Future;
use std::time::Duration;

use super::provider::{AttemptError, ClientError, Result};
use crate::config::RetrySettings;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Bookkeeping for one failed attempt inside [`RetryPolicy::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub computed_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
        }
    }

    /// `base_delay * 2^attempt_index`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt_index))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt_index = 0u32;

        loop {
            let attempt = RetryAttempt {
                attempt_number: attempt_index + 1,
                computed_delay: self.delay_for(attempt_index),
            };

            let err = match op(attempt.attempt_number).await {
                Ok(value) => {
                    if attempt.attempt_number > 1 {
                        tracing::info!(
                            operation,
                            attempt = attempt.attempt_number,
                            "Request succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::warn!(operation, error = %err, "Request failed permanently");
                return Err(match err {
                    AttemptError::Status { status, body } => ClientError::Rejected {
                        operation: operation.to_string(),
                        status,
                        body,
                    },
                    other => ClientError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt.attempt_number,
                        last: other,
                    },
                });
            }

            if attempt.attempt_number >= max_attempts {
                tracing::error!(
                    operation,
                    attempts = attempt.attempt_number,
                    error = %err,
                    "Request failed, retries exhausted"
                );
                return Err(ClientError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt.attempt_number,
                    last: err,
                });
            }

            tracing::warn!(
                operation,
                attempt = attempt.attempt_number,
                max_attempts,
                delay_ms = attempt.computed_delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            tokio::time::sleep(attempt.computed_delay).await;
            attempt_index += 1;
        }
    }
}
