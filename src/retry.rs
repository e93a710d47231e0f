//! Retry policy for the LLM boundary.
//!
//! Exponential backoff (`base_delay * 2^n`, capped at `max_delay`) over
//! transient failures only, bounded by an attempt count and an overall
//! deadline that covers every attempt and every sleep.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm::LlmError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub deadline_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 800,
            max_delay_ms: 10_000,
            jitter: false,
            deadline_secs: 60,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay())
            .with_max_delay(self.max_delay())
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1));
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Run `operation` under this policy, returning its output and the number
    /// of attempts made. Non-transient errors are returned immediately.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<(T, usize), LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let attempts = AtomicUsize::new(0);
        let attempt = || {
            attempts.fetch_add(1, Ordering::SeqCst);
            operation()
        };

        let retried = attempt
            .retry(self.backoff())
            .sleep(tokio::time::sleep)
            .when(|err: &LlmError| err.is_transient())
            .notify(|err: &LlmError, delay: Duration| {
                warn!(
                    "LLM call failed ({}), retrying in {}ms",
                    err,
                    delay.as_millis()
                );
            });

        match tokio::time::timeout(self.deadline(), retried).await {
            Ok(Ok(value)) => Ok((value, attempts.load(Ordering::SeqCst))),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(LlmError::DeadlineExceeded(self.deadline())),
        }
    }
}
