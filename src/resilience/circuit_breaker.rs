use crate::telemetry::{noop_sink, MetricEvent, MetricsSink};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which errors count against the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Every error returned by the wrapped operation is a failure.
    AllErrors,
    /// Only network errors, rate limiting, and 5xx responses count.
    #[default]
    InfrastructureOnly,
}

impl FailurePolicy {
    pub fn counts(&self, err: &Error) -> bool {
        match self {
            FailurePolicy::AllErrors => true,
            FailurePolicy::InfrastructureOnly => err.is_infrastructure(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub consecutive_failures: u32,
    pub half_open_attempts: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is admitted.
    pub reset_timeout: Duration,
    /// Concurrent trial calls admitted while half-open.
    pub half_open_limit: u32,
    /// Tick period of the background monitor started by [`CircuitBreaker::spawn_monitor`].
    pub monitor_interval: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_limit: 1,
            monitor_interval: Duration::from_secs(1),
            failure_policy: FailurePolicy::InfrastructureOnly,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_half_open_limit(mut self, limit: u32) -> Self {
        self.half_open_limit = limit;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    /// When the circuit last opened (or re-opened after a failed trial).
    last_failure: Option<Instant>,
    half_open_attempts: u32,
}

type Transition = (CircuitState, CircuitState);

struct Inner {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
    metrics: Arc<dyn MetricsSink>,
}

/// Three-state circuit breaker scoped to one named resource.
///
/// - Closed: calls pass; consecutive failures are counted
/// - Open: calls fail fast until `reset_timeout` has elapsed
/// - Half-open: up to `half_open_limit` trial calls; one success closes,
///   one failure re-opens
///
/// All state lives behind the breaker's own methods. Route calls through
/// [`CircuitBreaker::wrap`] so every admitted call records its outcome.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self::with_metrics(name, cfg, noop_sink())
    }

    pub fn with_metrics(
        name: impl Into<String>,
        mut cfg: CircuitBreakerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        cfg.failure_threshold = cfg.failure_threshold.max(1);
        cfg.half_open_limit = cfg.half_open_limit.max(1);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                cfg,
                state: Mutex::new(State {
                    state: CircuitState::Closed,
                    consecutive_failures: 0,
                    last_failure: None,
                    half_open_attempts: 0,
                }),
                metrics,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.cfg
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Admit or reject a call. An admitted half-open call takes a trial slot.
    pub fn is_allowed(&self) -> Result<()> {
        let now = Instant::now();
        let (result, transition) = {
            let mut st = self.inner.lock();
            let transition = self.inner.probe(&mut st, now);
            let limit = self.inner.cfg.half_open_limit;
            let result = match st.state {
                CircuitState::Closed => Ok(()),
                CircuitState::HalfOpen if st.half_open_attempts < limit => {
                    st.half_open_attempts += 1;
                    Ok(())
                }
                CircuitState::HalfOpen => Err(None),
                CircuitState::Open => Err(self.inner.open_remaining(&st, now)),
            };
            (result, transition)
        };
        self.inner.emit(transition);
        result.map_err(|retry_in| {
            self.inner.metrics.record(MetricEvent::CircuitRejected {
                name: self.inner.name.clone(),
            });
            Error::CircuitOpen {
                name: self.inner.name.clone(),
                retry_in_ms: retry_in.map(|d| d.as_millis() as u64),
            }
        })
    }

    /// Check whether a request is allowed without surfacing the error.
    pub fn allow_request(&self) -> bool {
        self.is_allowed().is_ok()
    }

    pub fn record_success(&self) {
        let transition = {
            let mut st = self.inner.lock();
            match st.state {
                CircuitState::HalfOpen => {
                    st.consecutive_failures = 0;
                    st.half_open_attempts = 0;
                    st.last_failure = None;
                    Inner::set_state(&mut st, CircuitState::Closed)
                }
                _ => {
                    st.consecutive_failures = 0;
                    None
                }
            }
        };
        self.inner.emit(transition);
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let transition = {
            let mut st = self.inner.lock();
            match st.state {
                CircuitState::Closed => {
                    st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                    if st.consecutive_failures >= self.inner.cfg.failure_threshold {
                        st.last_failure = Some(now);
                        Inner::set_state(&mut st, CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    st.half_open_attempts = 0;
                    st.last_failure = Some(now);
                    Inner::set_state(&mut st, CircuitState::Open)
                }
                CircuitState::Open => {
                    // A call admitted before the trip finished late; push the deadline out.
                    st.last_failure = Some(now);
                    None
                }
            }
        };
        self.inner.emit(transition);
    }

    /// Run `op` if the breaker admits it, recording the outcome.
    ///
    /// Errors the failure policy does not count still release a half-open slot
    /// without changing state.
    pub async fn wrap<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.is_allowed()?;
        match op().await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(e) => {
                if self.inner.cfg.failure_policy.counts(&e) {
                    self.record_failure();
                } else {
                    self.release_trial();
                }
                Err(e)
            }
        }
    }

    fn release_trial(&self) {
        let mut st = self.inner.lock();
        if st.state == CircuitState::HalfOpen {
            st.half_open_attempts = st.half_open_attempts.saturating_sub(1);
        }
    }

    /// Move OPEN to HALF_OPEN once the reset timeout has elapsed.
    pub fn tick(&self) {
        let transition = {
            let mut st = self.inner.lock();
            self.inner.probe(&mut st, Instant::now())
        };
        self.inner.emit(transition);
    }

    /// Spawn a task that calls [`CircuitBreaker::tick`] every `monitor_interval`.
    ///
    /// The task holds a weak reference and exits once every handle is dropped.
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.cfg.monitor_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                CircuitBreaker { inner }.tick();
            }
        })
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.inner.lock();
        CircuitBreakerSnapshot {
            state: st.state,
            failure_threshold: self.inner.cfg.failure_threshold,
            reset_timeout_ms: self.inner.cfg.reset_timeout.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            half_open_attempts: st.half_open_attempts,
            open_remaining_ms: if st.state == CircuitState::Open {
                self.inner
                    .open_remaining(&st, now)
                    .map(|d| d.as_millis() as u64)
            } else {
                None
            },
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn open_remaining(&self, st: &State, now: Instant) -> Option<Duration> {
        st.last_failure
            .map(|t| (t + self.cfg.reset_timeout).saturating_duration_since(now))
    }

    fn probe(&self, st: &mut State, now: Instant) -> Option<Transition> {
        if st.state != CircuitState::Open {
            return None;
        }
        let due = st
            .last_failure
            .map(|t| now.saturating_duration_since(t) >= self.cfg.reset_timeout)
            .unwrap_or(true);
        if due {
            st.half_open_attempts = 0;
            Inner::set_state(st, CircuitState::HalfOpen)
        } else {
            None
        }
    }

    fn set_state(st: &mut State, to: CircuitState) -> Option<Transition> {
        let from = st.state;
        if from == to {
            return None;
        }
        st.state = to;
        Some((from, to))
    }

    fn emit(&self, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };
        info!(
            breaker = self.name.as_str(),
            from = from.as_str(),
            to = to.as_str(),
            "circuit breaker state changed"
        );
        self.metrics.record(MetricEvent::CircuitTransition {
            name: self.name.clone(),
            from,
            to,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ErrorClass;
    use crate::telemetry::InMemoryMetricsSink;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_reset_timeout(Duration::from_millis(reset_ms)),
        )
    }

    fn server_error() -> Error {
        Error::Remote {
            provider: "test".into(),
            status: 503,
            class: ErrorClass::HttpError,
            message: "unavailable".into(),
        }
    }

    fn bad_request() -> Error {
        Error::Remote {
            provider: "test".into(),
            status: 400,
            class: ErrorClass::Validation,
            message: "bad".into(),
        }
    }

    #[test]
    fn test_circuit_breaker_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(30));
        assert_eq!(config.half_open_limit, 1);
        assert_eq!(config.failure_policy, FailurePolicy::InfrastructureOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_initial_state() {
        let cb = breaker(3, 1_000);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_allowed().is_ok());
        let snapshot = cb.snapshot();
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.open_remaining_ms.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exactly_threshold_failures() {
        let cb = breaker(3, 1_000);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(
            cb.is_allowed(),
            Err(Error::CircuitOpen { ref name, .. }) if name == "test"
        ));
        assert_eq!(cb.snapshot().open_remaining_ms, Some(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures_while_closed() {
        let cb = breaker(3, 1_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_reset_timeout() {
        let cb = breaker(1, 500);
        cb.record_failure();
        for _ in 0..10 {
            assert!(!cb.allow_request());
            tokio::time::advance(Duration::from_millis(49)).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(cb.is_allowed().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_trials() {
        let cb = CircuitBreaker::new(
            "trial",
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_millis(100))
                .with_half_open_limit(2),
        );
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.allow_request());
        assert!(cb.allow_request());
        assert!(!cb.allow_request());
        assert_eq!(cb.snapshot().half_open_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(2, 100);
        cb.record_failure();
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cb.allow_request());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_clock() {
        let cb = breaker(1, 100);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(!cb.allow_request());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_moves_open_to_half_open() {
        let cb = CircuitBreaker::new(
            "monitored",
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_millis(200))
                .with_monitor_interval(Duration::from_millis(50)),
        );
        let monitor = cb.spawn_monitor();
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(260)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        monitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_skips_operation_when_open() {
        let sink = Arc::new(InMemoryMetricsSink::default());
        let cb = CircuitBreaker::with_metrics(
            "wrapped",
            CircuitBreakerConfig::new().with_failure_threshold(2),
            sink.clone(),
        );
        let calls = AtomicU32::new(0);
        let counter = &calls;
        for _ in 0..2 {
            let out: Result<()> = cb
                .wrap(move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(server_error())
                })
                .await;
            assert!(out.is_err());
        }
        let out: Result<()> = cb
            .wrap(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(out, Err(Error::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sink.count("circuit_transition"), 1);
        assert_eq!(sink.count("circuit_rejected"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_application_errors_do_not_trip_by_default() {
        let cb = breaker(1, 1_000);
        let out: Result<()> = cb.wrap(|| async { Err(bad_request()) }).await;
        assert!(out.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_errors_policy_counts_application_errors() {
        let cb = CircuitBreaker::new(
            "strict",
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_failure_policy(FailurePolicy::AllErrors),
        );
        let _: Result<()> = cb.wrap(|| async { Err(bad_request()) }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_isolated() {
        let a = breaker(1, 1_000);
        let b = breaker(1, 1_000);
        a.record_failure();
        assert!(!a.allow_request());
        assert!(b.allow_request());
    }

    #[test]
    fn test_circuit_breaker_thread_safe() {
        let cb = Arc::new(CircuitBreaker::new(
            "threads",
            CircuitBreakerConfig::new().with_failure_threshold(100),
        ));
        let mut handles = vec![];
        for _ in 0..10 {
            let cb_clone = Arc::clone(&cb);
            handles.push(std::thread::spawn(move || {
                for _ in 0..5 {
                    cb_clone.record_failure();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.snapshot().consecutive_failures, 50);
    }
}
