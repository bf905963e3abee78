//! Retry with full-jitter exponential backoff.
//!
//! The retrier enforces no deadline of its own: the wrapped operation must carry
//! its own timeout (the HTTP transport does).

use crate::telemetry::{noop_sink, MetricEvent, MetricsSink};
use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry logic
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the uniform jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (1-based) for a given jitter sample:
    /// `min(base * 2^(attempt-1) + jitter, max_delay)`.
    pub fn backoff(&self, attempt: u32, jitter: Duration) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let exp = base.saturating_mul(factor);
        let delay = exp.saturating_add(jitter.as_millis() as u64);
        Duration::from_millis(delay).min(self.max_delay)
    }

    fn sample_jitter(&self) -> Duration {
        let cap = self.max_jitter.as_millis() as u64;
        if cap == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..cap))
    }
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, or
/// `max_retries` retries have been spent. Exhaustion returns the last error seen.
pub async fn with_retry<T, E, F, Fut, P>(
    mut operation: F,
    policy: &RetryPolicy,
    should_retry: P,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if attempt > policy.max_retries || !should_retry(&e) {
                    return Err(e);
                }
                let delay = policy.backoff(attempt, policy.sample_jitter());
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Named retrier over crate errors using [`Error::is_transient`] as the predicate.
///
/// Exhaustion wraps the last error in [`Error::RetriesExhausted`] so callers can see
/// which resource gave up.
pub struct BackoffRetrier {
    resource: String,
    policy: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
}

impl BackoffRetrier {
    pub fn new(resource: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            resource: resource.into(),
            policy,
            metrics: noop_sink(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with(operation, Error::is_transient).await
    }

    pub async fn run_with<T, F, Fut, P>(&self, mut operation: F, should_retry: P) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            let err = match operation().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            attempt += 1;
            if !should_retry(&err) {
                return Err(err);
            }
            if attempt > self.policy.max_retries {
                self.metrics.record(MetricEvent::RetriesExhausted {
                    resource: self.resource.clone(),
                    attempts: attempt,
                });
                return Err(Error::RetriesExhausted {
                    resource: self.resource.clone(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            let delay = self.policy.backoff(attempt, self.policy.sample_jitter());
            warn!(
                resource = self.resource.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error_class = err.class().name(),
                error = %err,
                "retrying after transient failure"
            );
            self.metrics.record(MetricEvent::RetryScheduled {
                resource: self.resource.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            tokio::time::sleep(delay).await;
        }
    }
}
