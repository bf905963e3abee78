use crate::telemetry::{noop_sink, MetricEvent, MetricsSink};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub capacity: u32,
    pub tokens: u32,
    pub queued: usize,
    /// Time until the next token is minted (ms), if the bucket is not full.
    pub next_refill_ms: Option<u64>,
}

/// How tokens come back into the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefillStrategy {
    /// Reset to full capacity once a whole `interval` has elapsed.
    ///
    /// Allows up to `2 * capacity` grants across a window boundary.
    #[default]
    FixedWindow,
    /// Mint one token every `interval / capacity`.
    Continuous,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens in the bucket.
    pub capacity: u32,
    /// Refill window.
    pub interval: Duration,
    pub refill: RefillStrategy,
    /// How long a queued caller waits before giving up. Defaults to `interval`.
    pub queue_timeout: Option<Duration>,
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self {
            capacity: 10,
            interval: Duration::from_secs(1),
            refill: RefillStrategy::FixedWindow,
            queue_timeout: None,
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_refill_strategy(mut self, refill: RefillStrategy) -> Self {
        self.refill = refill;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = Some(timeout);
        self
    }

    pub fn queue_timeout(&self) -> Duration {
        self.queue_timeout.unwrap_or(self.interval)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::configuration_with_context(
                "rate limiter capacity must be at least 1",
                ErrorContext::new()
                    .with_field_path("rate_limit.capacity")
                    .with_source("rate_limiter"),
            ));
        }
        if self.interval.is_zero() {
            return Err(Error::configuration_with_context(
                "rate limiter interval must be non-zero",
                ErrorContext::new()
                    .with_field_path("rate_limit.interval_ms")
                    .with_source("rate_limiter"),
            ));
        }
        Ok(())
    }

    fn token_period(&self) -> Duration {
        self.interval / self.capacity.max(1)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct State {
    tokens: u32,
    last_refill: Instant,
    queue: VecDeque<Waiter>,
    next_id: u64,
    /// Set while a drain is handing out tokens outside the lock.
    processing: bool,
    timer_armed: bool,
}

struct Inner {
    name: String,
    cfg: RateLimiterConfig,
    state: Mutex<State>,
    metrics: Arc<dyn MetricsSink>,
}

/// Token-bucket limiter with a FIFO wait queue.
///
/// - Refill is lazy: computed on `acquire()` from the time since the last refill
/// - Callers that find the bucket empty (or others already waiting) are queued
/// - A background timer drains the queue when the next window opens
/// - Queued callers give up after `queue_timeout` without consuming a token
///
/// Cloning yields another handle to the same bucket.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, cfg: RateLimiterConfig) -> Self {
        Self::with_metrics(name, cfg, noop_sink())
    }

    pub fn with_metrics(
        name: impl Into<String>,
        mut cfg: RateLimiterConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        cfg.capacity = cfg.capacity.max(1);
        let state = Mutex::new(State {
            tokens: cfg.capacity,
            last_refill: Instant::now(),
            queue: VecDeque::new(),
            next_id: 0,
            processing: false,
            timer_armed: false,
        });
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                cfg,
                state,
                metrics,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.inner.cfg
    }

    /// Acquire one token, waiting in FIFO order if none is available.
    pub async fn acquire(&self) -> Result<()> {
        let (id, mut rx) = {
            let mut st = self.inner.lock();
            Inner::refill(&self.inner.cfg, &mut st, Instant::now());
            if st.queue.is_empty() && st.tokens > 0 {
                st.tokens -= 1;
                drop(st);
                self.inner.metrics.record(MetricEvent::TokenGranted {
                    resource: self.inner.name.clone(),
                    queued: false,
                });
                return Ok(());
            }
            let id = st.next_id;
            st.next_id += 1;
            let (tx, rx) = oneshot::channel();
            st.queue.push_back(Waiter { id, tx });
            debug!(
                limiter = self.inner.name.as_str(),
                queued = st.queue.len(),
                "rate limiter queued request"
            );
            (id, rx)
        };

        // A refill may already be due; drain so FIFO order decides who gets it.
        Inner::process_queue(&self.inner);

        let timeout = self.inner.cfg.queue_timeout();
        let granted = tokio::select! {
            res = &mut rx => res.is_ok(),
            _ = tokio::time::sleep(timeout) => {
                let removed = {
                    let mut st = self.inner.lock();
                    match st.queue.iter().position(|w| w.id == id) {
                        Some(pos) => {
                            st.queue.remove(pos);
                            true
                        }
                        None => false,
                    }
                };
                if removed {
                    warn!(
                        limiter = self.inner.name.as_str(),
                        waited_ms = timeout.as_millis() as u64,
                        "rate limiter wait timed out"
                    );
                    self.inner.metrics.record(MetricEvent::RateLimitTimeout {
                        resource: self.inner.name.clone(),
                    });
                    return Err(Error::RateLimitTimeout {
                        resource: self.inner.name.clone(),
                        waited_ms: timeout.as_millis() as u64,
                    });
                }
                // Dequeued by a drain that is handing us the token right now.
                (&mut rx).await.is_ok()
            }
        };

        if !granted {
            return Err(Error::runtime_with_context(
                "rate limiter dropped a queued request",
                ErrorContext::new().with_source("rate_limiter"),
            ));
        }
        self.inner.metrics.record(MetricEvent::TokenGranted {
            resource: self.inner.name.clone(),
            queued: true,
        });
        Ok(())
    }

    /// Take a token without waiting. Never jumps ahead of queued callers.
    pub fn try_acquire(&self) -> bool {
        let mut st = self.inner.lock();
        Inner::refill(&self.inner.cfg, &mut st, Instant::now());
        if st.queue.is_empty() && st.tokens > 0 {
            st.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Run `op` once a token has been granted.
    pub async fn wrap<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire().await?;
        op().await
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.inner.cfg;
        let mut st = self.inner.lock();
        let now = Instant::now();
        Inner::refill(cfg, &mut st, now);
        let next_refill_ms = if st.tokens < cfg.capacity {
            Some(Inner::next_refill_in(cfg, &st, now).as_millis() as u64)
        } else {
            None
        };
        RateLimiterSnapshot {
            capacity: cfg.capacity,
            tokens: st.tokens,
            queued: st.queue.len(),
            next_refill_ms,
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn refill(cfg: &RateLimiterConfig, st: &mut State, now: Instant) {
        let elapsed = now.saturating_duration_since(st.last_refill);
        match cfg.refill {
            RefillStrategy::FixedWindow => {
                if elapsed >= cfg.interval {
                    st.tokens = cfg.capacity;
                    st.last_refill = now;
                }
            }
            RefillStrategy::Continuous => {
                let period = cfg.token_period();
                if period.is_zero() {
                    st.tokens = cfg.capacity;
                    st.last_refill = now;
                    return;
                }
                let earned = elapsed.as_nanos() / period.as_nanos();
                if earned == 0 {
                    return;
                }
                let tokens = (st.tokens as u128 + earned).min(cfg.capacity as u128) as u32;
                st.tokens = tokens;
                if tokens == cfg.capacity {
                    st.last_refill = now;
                } else {
                    // Keep the fractional progress towards the next token.
                    st.last_refill += period * earned as u32;
                }
            }
        }
    }

    fn next_refill_in(cfg: &RateLimiterConfig, st: &State, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(st.last_refill);
        let period = match cfg.refill {
            RefillStrategy::FixedWindow => cfg.interval,
            RefillStrategy::Continuous => cfg.token_period(),
        };
        period.saturating_sub(elapsed)
    }

    /// Hand available tokens to queued callers in arrival order.
    fn process_queue(inner: &Arc<Inner>) {
        loop {
            let batch = {
                let mut st = inner.lock();
                if st.processing {
                    return;
                }
                Inner::refill(&inner.cfg, &mut st, Instant::now());
                let mut batch = Vec::new();
                while st.tokens > 0 {
                    match st.queue.pop_front() {
                        Some(w) => {
                            st.tokens -= 1;
                            batch.push(w);
                        }
                        None => break,
                    }
                }
                if batch.is_empty() {
                    break;
                }
                st.processing = true;
                batch
            };

            // A failed send means the caller went away; its token goes back.
            let refunds = batch
                .into_iter()
                .filter_map(|w| w.tx.send(()).err())
                .count() as u32;

            let mut st = inner.lock();
            st.processing = false;
            st.tokens = (st.tokens + refunds).min(inner.cfg.capacity);
            if st.queue.is_empty() || st.tokens == 0 {
                break;
            }
        }
        Inner::arm_timer(inner);
    }

    fn arm_timer(inner: &Arc<Inner>) {
        let delay = {
            let mut st = inner.lock();
            if st.timer_armed || st.queue.is_empty() {
                return;
            }
            st.timer_armed = true;
            Inner::next_refill_in(&inner.cfg, &st, Instant::now())
        };
        let weak: Weak<Inner> = Arc::downgrade(inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.lock().timer_armed = false;
                Inner::process_queue(&inner);
            }
        });
    }
}
