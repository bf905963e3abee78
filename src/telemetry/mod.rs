//! Metrics sinks and logging setup.
//!
//! Every resilience component takes an `Arc<dyn MetricsSink>` at construction instead
//! of bumping process-wide counters, so two limiters (or two tests) never share
//! state. The default sink is [`NoopMetricsSink`].
//!
//! | Sink | Use |
//! |------|-----|
//! | [`NoopMetricsSink`] | Default, drops everything |
//! | [`InMemoryMetricsSink`] | Tests and ad-hoc inspection |
//! | [`TracingMetricsSink`] | Forwards events as `tracing` records |
//! | [`CompositeMetricsSink`] | Fan-out to several sinks |

use crate::resilience::circuit_breaker::CircuitState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// A single observation emitted by a component.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    RetryScheduled {
        resource: String,
        attempt: u32,
        delay_ms: u64,
    },
    RetriesExhausted {
        resource: String,
        attempts: u32,
    },
    TokenGranted {
        resource: String,
        queued: bool,
    },
    RateLimitTimeout {
        resource: String,
    },
    CircuitTransition {
        name: String,
        from: CircuitState,
        to: CircuitState,
    },
    CircuitRejected {
        name: String,
    },
    FrameSkipped {
        reason: String,
    },
    RunawayDetected {
        reason: String,
    },
    RequestCompleted {
        provider: String,
        duration_ms: u64,
        chars: usize,
    },
}

impl MetricEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MetricEvent::RetryScheduled { .. } => "retry_scheduled",
            MetricEvent::RetriesExhausted { .. } => "retries_exhausted",
            MetricEvent::TokenGranted { .. } => "token_granted",
            MetricEvent::RateLimitTimeout { .. } => "rate_limit_timeout",
            MetricEvent::CircuitTransition { .. } => "circuit_transition",
            MetricEvent::CircuitRejected { .. } => "circuit_rejected",
            MetricEvent::FrameSkipped { .. } => "frame_skipped",
            MetricEvent::RunawayDetected { .. } => "runaway_detected",
            MetricEvent::RequestCompleted { .. } => "request_completed",
        }
    }
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

/// Default sink: drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _event: MetricEvent) {}
}

pub fn noop_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetricsSink)
}

/// In-memory sink for testing.
pub struct InMemoryMetricsSink {
    events: Mutex<Vec<MetricEvent>>,
    max_events: usize,
}

impl InMemoryMetricsSink {
    pub fn new(max: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_events: max,
        }
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.lock().clone()
    }

    /// Number of recorded events of the given [`MetricEvent::kind`].
    pub fn count(&self, kind: &str) -> usize {
        self.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn counts(&self) -> HashMap<&'static str, usize> {
        let mut out = HashMap::new();
        for e in self.lock().iter() {
            *out.entry(e.kind()).or_insert(0) += 1;
        }
        out
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MetricEvent>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for InMemoryMetricsSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, event: MetricEvent) {
        let mut events = self.lock();
        events.push(event);
        if events.len() > self.max_events {
            events.remove(0);
        }
    }
}

/// Forwards events to the active `tracing` subscriber at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, event: MetricEvent) {
        tracing::debug!(target: "llm_relay::metrics", kind = event.kind(), event = ?event);
    }
}

/// Composite sink for multiple destinations.
pub struct CompositeMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl CompositeMetricsSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Default for CompositeMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for CompositeMetricsSink {
    fn record(&self, event: MetricEvent) {
        for s in &self.sinks {
            s.record(event.clone());
        }
    }
}

/// Install a `fmt` subscriber filtered by `LLM_RELAY_LOG` (falling back to `RUST_LOG`,
/// then `info`).
///
/// Returns `false` when a global subscriber is already installed.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env("LLM_RELAY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink_counts_by_kind() {
        let sink = InMemoryMetricsSink::new(10);
        sink.record(MetricEvent::CircuitRejected { name: "a".into() });
        sink.record(MetricEvent::CircuitRejected { name: "a".into() });
        sink.record(MetricEvent::RateLimitTimeout {
            resource: "a".into(),
        });
        assert_eq!(sink.count("circuit_rejected"), 2);
        assert_eq!(sink.count("rate_limit_timeout"), 1);
        assert_eq!(sink.counts().get("circuit_rejected"), Some(&2));
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_in_memory_sink_is_bounded() {
        let sink = InMemoryMetricsSink::new(2);
        for i in 0..5 {
            sink.record(MetricEvent::FrameSkipped {
                reason: i.to_string(),
            });
        }
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            MetricEvent::FrameSkipped {
                reason: "3".into()
            }
        );
    }

    #[test]
    fn test_composite_fans_out() {
        let a = Arc::new(InMemoryMetricsSink::default());
        let b = Arc::new(InMemoryMetricsSink::default());
        let composite = CompositeMetricsSink::new()
            .add_sink(a.clone())
            .add_sink(b.clone())
            .add_sink(noop_sink());
        composite.record(MetricEvent::RunawayDetected {
            reason: "repeated_error".into(),
        });
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        assert!(!init_tracing());
    }
}
