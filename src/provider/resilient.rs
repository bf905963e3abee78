use crate::config::RelayConfig;
use crate::pipeline::CancelHandle;
use crate::provider::ChatProvider;
use crate::resilience::{
    BackoffRetrier, CircuitBreaker, CircuitBreakerSnapshot, RateLimiter, RateLimiterSnapshot,
};
use crate::telemetry::{noop_sink, MetricsSink};
use crate::types::{Message, StreamOutcome, ToolDeclaration};
use crate::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Read-only view of a provider's resilience state.
#[derive(Debug, Clone)]
pub struct ResilienceSnapshot {
    pub provider: String,
    pub rate_limiter: RateLimiterSnapshot,
    pub circuit_breaker: CircuitBreakerSnapshot,
}

/// A [`ChatProvider`] behind its own rate limiter, circuit breaker, and retrier.
///
/// Each call acquires a token, passes the breaker, then runs the backoff loop:
///
/// ```text
/// acquire() → breaker.wrap( retrier.run( inner.complete ) )
/// ```
///
/// A [`CancelHandle`] passed to [`ResilientProvider::complete`] reaches the inner
/// stream on every attempt; cancelling while queued for a token returns at once.
///
/// The three components are named after the inner provider and never shared
/// with another provider.
pub struct ResilientProvider {
    inner: Arc<dyn ChatProvider>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retrier: BackoffRetrier,
}

impl ResilientProvider {
    pub fn new(inner: Arc<dyn ChatProvider>, config: &RelayConfig) -> Self {
        Self::with_metrics(inner, config, noop_sink())
    }

    pub fn with_metrics(
        inner: Arc<dyn ChatProvider>,
        config: &RelayConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let name = inner.name().to_string();
        let limiter =
            RateLimiter::with_metrics(name.clone(), config.rate_limit.to_config(), metrics.clone());
        let breaker = CircuitBreaker::with_metrics(
            name.clone(),
            config.circuit_breaker.to_config(),
            metrics.clone(),
        );
        let retrier = BackoffRetrier::new(name, config.retry.to_policy()).with_metrics(metrics);
        Self::from_parts(inner, limiter, breaker, retrier)
    }

    pub fn from_parts(
        inner: Arc<dyn ChatProvider>,
        limiter: RateLimiter,
        breaker: CircuitBreaker,
        retrier: BackoffRetrier,
    ) -> Self {
        Self {
            inner,
            limiter,
            breaker,
            retrier,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Start the breaker's periodic OPEN→HALF_OPEN check. Optional: the breaker
    /// also checks lazily on every call.
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        self.breaker.spawn_monitor()
    }

    pub async fn make_request(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<String> {
        Ok(self.complete(messages, tools, None).await?.text)
    }

    pub async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        cancel: Option<CancelHandle>,
    ) -> Result<StreamOutcome> {
        match &cancel {
            Some(handle) => {
                tokio::select! {
                    biased;
                    _ = handle.cancelled() => return Ok(StreamOutcome::cancelled(String::new())),
                    granted = self.limiter.acquire() => granted?,
                }
            }
            None => self.limiter.acquire().await?,
        }
        let inner = &self.inner;
        let retrier = &self.retrier;
        self.breaker
            .wrap(|| retrier.run(|| inner.complete(messages, tools, cancel.clone())))
            .await
    }

    pub fn snapshot(&self) -> ResilienceSnapshot {
        ResilienceSnapshot {
            provider: self.name().to_string(),
            rate_limiter: self.limiter.snapshot(),
            circuit_breaker: self.breaker.snapshot(),
        }
    }
}

#[async_trait::async_trait]
impl ChatProvider for ResilientProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn make_request(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<String> {
        ResilientProvider::make_request(self, messages, tools).await
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
        cancel: Option<CancelHandle>,
    ) -> Result<StreamOutcome> {
        ResilientProvider::complete(self, messages, tools, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::error_code::ErrorClass;
    use crate::resilience::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
        status: u16,
    }

    #[async_trait::async_trait]
    impl ChatProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn make_request(&self, _m: &[Message], _t: &[ToolDeclaration]) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                Err(Error::Remote {
                    provider: "flaky".into(),
                    status: self.status,
                    class: ErrorClass::from_http_status(self.status),
                    message: "nope".into(),
                })
            } else {
                Ok(format!("ok #{}", n))
            }
        }
    }

    fn config() -> RelayConfig {
        let mut cfg = RelayConfig::default();
        cfg.retry.base_delay_ms = 10;
        cfg.retry.max_jitter_ms = 0;
        cfg.circuit_breaker.failure_threshold = 2;
        cfg
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_call_retried_to_success() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 2,
            status: 429,
        });
        let provider = ResilientProvider::new(inner.clone(), &config());
        let out = provider.make_request(&[Message::user("hi")], &[]).await.unwrap();
        assert_eq!(out, "ok #3");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(provider.snapshot().circuit_breaker.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_not_retried_and_breaker_untouched() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 10,
            status: 400,
        });
        let provider = ResilientProvider::new(inner.clone(), &config());
        for _ in 0..3 {
            let err = provider.make_request(&[Message::user("hi")], &[]).await.unwrap_err();
            assert_eq!(err.class(), ErrorClass::Validation);
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        let snap = provider.snapshot();
        assert_eq!(snap.circuit_breaker.state, CircuitState::Closed);
        assert_eq!(snap.circuit_breaker.consecutive_failures, 0);
        assert_eq!(snap.provider, "flaky");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_name_the_provider() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 100,
            status: 429,
        });
        let mut cfg = config();
        cfg.retry.max_retries = 1;
        let provider = ResilientProvider::new(inner.clone(), &cfg);
        match provider.make_request(&[Message::user("hi")], &[]).await {
            Err(Error::RetriesExhausted { resource, attempts, last }) => {
                assert_eq!(resource, "flaky");
                assert_eq!(attempts, 2);
                assert_eq!(last.class(), ErrorClass::RateLimited);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(
            provider.snapshot().circuit_breaker.consecutive_failures,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_tokens_consumed_per_call() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 0,
            status: 200,
        });
        let mut cfg = config();
        cfg.rate_limit.capacity = 2;
        cfg.rate_limit.interval_ms = 1_000;
        cfg.rate_limit.queue_timeout_ms = Some(5_000);
        let provider = ResilientProvider::new(inner, &cfg);
        provider.make_request(&[Message::user("a")], &[]).await.unwrap();
        provider.make_request(&[Message::user("b")], &[]).await.unwrap();
        assert_eq!(provider.snapshot().rate_limiter.tokens, 0);

        let start = tokio::time::Instant::now();
        provider.make_request(&[Message::user("c")], &[]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_queued_skips_the_call() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 0,
            status: 200,
        });
        let mut cfg = config();
        cfg.rate_limit.capacity = 1;
        cfg.rate_limit.interval_ms = 60_000;
        let provider = ResilientProvider::new(inner.clone(), &cfg);
        provider.make_request(&[Message::user("a")], &[]).await.unwrap();

        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        let messages = [Message::user("b")];
        let (outcome, _) = tokio::join!(
            provider.complete(&messages, &[], Some(cancel)),
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                trigger.cancel();
            }
        );
        let outcome = outcome.unwrap();
        assert_eq!(outcome.finish, crate::types::FinishReason::Cancelled);
        assert!(outcome.text.is_empty());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_without_cancel_wraps_text() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 0,
            status: 200,
        });
        let provider = ResilientProvider::new(inner, &config());
        let outcome = provider
            .complete(&[Message::user("hi")], &[], Some(CancelHandle::new()))
            .await
            .unwrap();
        assert_eq!(outcome, StreamOutcome::completed("ok #1"));
    }
}
