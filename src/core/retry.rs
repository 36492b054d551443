//! Bounded retry with exponential backoff for calls to the printer cloud.
//!
//! Only transient failures are retried (network errors, 429, 5xx). A request the
//! provider rejected with any other status fails immediately. Calls that must not run
//! twice (job creation, print trigger) are only retried when the provider never got them.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;

use super::error::{ErrorClass, PrintError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Whether a remote call can be repeated after the provider may have seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Repeating the call has the same effect as making it once.
    Idempotent,
    /// Repeat only when the request was provably not delivered.
    UndeliveredOnly,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
    Exhausted,
}

impl RetryPolicy {
    /// `attempt` counts retries already made, starting at zero.
    pub fn decide(&self, err: &PrintError, attempt: u32, replay: Replay) -> RetryDecision {
        match err.class() {
            ErrorClass::Permanent => RetryDecision::GiveUp,
            ErrorClass::Transient if replay == Replay::UndeliveredOnly && !err.never_delivered() => {
                RetryDecision::GiveUp
            }
            ErrorClass::Transient if attempt >= self.max_retries => RetryDecision::Exhausted,
            ErrorClass::Transient => RetryDecision::RetryAfter(self.delay_for(attempt)),
        }
    }

    /// delay = min(base * 2^attempt + jitter, max_delay), jitter in [0, base)
    fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
        let jitter_ms = (attempt as u64).wrapping_mul(6364136223846793005) % base_ms.max(1);
        let capped_ms = exp_ms
            .saturating_add(jitter_ms)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped_ms)
    }

    /// Run an idempotent `op` until it succeeds, fails permanently, or runs out of retries.
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with(operation, Replay::Idempotent, op).await
    }

    /// Like `run`, for calls the provider must not receive twice.
    pub async fn run_once<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with(operation, Replay::UndeliveredOnly, op).await
    }

    async fn run_with<T, F, Fut>(&self, operation: &str, replay: Replay, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.decide(&err, attempt, replay) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::Exhausted => {
                        warn!(operation, attempts = attempt + 1, error = %err, "Retry limit exhausted");
                        return Err(err);
                    }
                    RetryDecision::GiveUp => {
                        debug!(operation, error = %err, "Permanent failure, not retrying");
                        return Err(err);
                    }
                },
            }
        }
    }
}
