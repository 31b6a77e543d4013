//! Bounded exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use crate::errors::{CouchError, Result};
use crate::logger::Logger;

/// How often and how patiently to re-issue an operation.
///
/// The operation runs at most `max_retries + 1` times. Before retry `n`
/// (counting from zero) the executor waits
/// `min(initial_delay * backoff_factor^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(CouchError::Config(format!(
                "backoff factor must be at least 1, got {}",
                self.backoff_factor
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(CouchError::Config(
                "max delay must not be shorter than the initial delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns a copy that [`validate`](Self::validate) would accept: a
    /// factor below 1 or not finite becomes 1, and `max_delay` is raised to
    /// `initial_delay`.
    pub fn sanitized(&self) -> Self {
        let backoff_factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 1.0 {
            self.backoff_factor
        } else {
            1.0
        };
        Self {
            backoff_factor,
            max_delay: self.max_delay.max(self.initial_delay),
            ..*self
        }
    }

    /// The delays the executor sleeps between attempts, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut current = self.initial_delay;
        (0..self.max_retries).map(move |_| {
            let delay = current.min(self.max_delay);
            current = Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
                .map_or(self.max_delay, |next| next.min(self.max_delay));
            delay
        })
    }
}

/// Runs operations under a [`RetryPolicy`].
///
/// Only [`CouchError::Transient`] failures are retried; anything else is
/// returned on the first occurrence. When the retries run out the last
/// transient failure is wrapped in [`CouchError::RetriesExhausted`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    logger: Logger,
}

impl RetryExecutor {
    /// Creates an executor. An invalid `policy` is clamped with
    /// [`RetryPolicy::sanitized`].
    pub fn new(policy: RetryPolicy, logger: Logger) -> Self {
        if let Err(err) = policy.validate() {
            logger.warn(format_args!("Clamping retry policy: {}", err));
        }
        Self {
            policy: policy.sanitized(),
            logger,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invokes `operation` until it succeeds, fails fatally, or the policy
    /// is exhausted.
    ///
    /// The operation may run several times; it must be safe to re-issue.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delays = self.policy.delays();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };
            let Some(delay) = delays.next() else {
                if self.policy.max_retries == 0 {
                    return Err(err);
                }
                self.logger.error(format_args!(
                    "Giving up after {} attempts: {}",
                    attempt, err
                ));
                return Err(CouchError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            };
            self.logger.warn(format_args!(
                "Attempt {} failed with transient error ({}), retrying in {:?}",
                attempt, err, delay
            ));
            tokio::time::sleep(delay).await;
        }
    }
}

/// Runs `operation` under `policy` with the default logger.
pub async fn with_retry<F, Fut, T>(policy: RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::new(policy, Logger::default()).execute(operation).await
}
