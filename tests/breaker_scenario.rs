//! End-to-end circuit-breaker lifecycle through `ResilientProvider`.

use llm_relay::provider::{ChatProvider, ResilientProvider};
use llm_relay::resilience::CircuitState;
use llm_relay::telemetry::InMemoryMetricsSink;
use llm_relay::types::{Message, ToolDeclaration};
use llm_relay::{Error, ErrorClass, RelayConfig, Result};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counts every network attempt; fails with a connection reset while `down` is set.
struct ScriptedProvider {
    attempts: AtomicU32,
    down: AtomicBool,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            attempts: AtomicU32::new(0),
            down: AtomicBool::new(true),
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn make_request(
        &self,
        messages: &[Message],
        _tools: &[ToolDeclaration],
    ) -> Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        Ok(format!("echo: {}", messages[0].content))
    }
}

fn scenario_config() -> RelayConfig {
    let mut cfg = RelayConfig::default();
    cfg.retry.max_retries = 0;
    cfg.circuit_breaker.failure_threshold = 3;
    cfg.circuit_breaker.reset_timeout_ms = 30_000;
    cfg
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_rejects_and_recovers() {
    let backend = Arc::new(ScriptedProvider::new());
    let sink = Arc::new(InMemoryMetricsSink::default());
    let provider =
        ResilientProvider::with_metrics(backend.clone(), &scenario_config(), sink.clone());
    let convo = [Message::user("ping")];

    for n in 1..=3 {
        let err = provider.make_request(&convo, &[]).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::TransientNetwork, "call {}", n);
    }
    assert_eq!(backend.attempts(), 3);
    assert_eq!(provider.snapshot().circuit_breaker.state, CircuitState::Open);

    // Fourth call fails fast without touching the backend.
    let err = provider.make_request(&convo, &[]).await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { ref name, .. } if name == "scripted"));
    assert_eq!(err.class(), ErrorClass::BreakerOpen);
    assert_eq!(backend.attempts(), 3);

    // Still open just before the deadline, however many calls are attempted.
    tokio::time::advance(Duration::from_millis(29_000)).await;
    for _ in 0..5 {
        assert!(matches!(
            provider.make_request(&convo, &[]).await,
            Err(Error::CircuitOpen { .. })
        ));
    }
    assert_eq!(backend.attempts(), 3);

    backend.down.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_millis(1_001)).await;

    let text = provider.make_request(&convo, &[]).await.unwrap();
    assert_eq!(text, "echo: ping");
    assert_eq!(backend.attempts(), 4);

    let snap = provider.snapshot();
    assert_eq!(snap.circuit_breaker.state, CircuitState::Closed);
    assert_eq!(snap.circuit_breaker.consecutive_failures, 0);

    assert_eq!(sink.count("circuit_rejected"), 6);
    // closed→open, open→half_open, half_open→closed
    assert_eq!(sink.count("circuit_transition"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens() {
    let backend = Arc::new(ScriptedProvider::new());
    let provider = ResilientProvider::new(backend.clone(), &scenario_config());
    let convo = [Message::user("ping")];

    for _ in 0..3 {
        let _ = provider.make_request(&convo, &[]).await;
    }
    tokio::time::advance(Duration::from_secs(31)).await;

    // Trial call goes out, fails, and the reset clock restarts.
    assert!(provider.make_request(&convo, &[]).await.is_err());
    assert_eq!(backend.attempts(), 4);
    assert_eq!(provider.snapshot().circuit_breaker.state, CircuitState::Open);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(matches!(
        provider.make_request(&convo, &[]).await,
        Err(Error::CircuitOpen { .. })
    ));
    assert_eq!(backend.attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_moves_open_to_half_open() {
    let backend = Arc::new(ScriptedProvider::new());
    let mut cfg = scenario_config();
    cfg.circuit_breaker.monitor_interval_ms = 1_000;
    let provider = ResilientProvider::new(backend, &cfg);
    let monitor = provider.spawn_monitor();
    let convo = [Message::user("ping")];

    for _ in 0..3 {
        let _ = provider.make_request(&convo, &[]).await;
    }
    assert_eq!(provider.circuit_breaker().state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_secs(32)).await;
    assert_eq!(provider.circuit_breaker().state(), CircuitState::HalfOpen);
    monitor.abort();
}
