//! Process-wide rolling metrics
//!
//! Counters are lock-free atomics; the latency average is an exponential
//! moving average (alpha = 0.2, seeded by the first sample) so a fixed sequence
//! of samples always yields the same value. A private prometheus registry
//! mirrors the counters for text exposition.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::feedback::Phase;

pub const LATENCY_EMA_ALPHA: f64 = 0.2;

/// How a single provider invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOutcome {
    Success,
    CacheHit,
    Failure,
    Timeout,
}

impl ProviderOutcome {
    fn label(&self) -> &'static str {
        match self {
            ProviderOutcome::Success => "success",
            ProviderOutcome::CacheHit => "cache_hit",
            ProviderOutcome::Failure => "failure",
            ProviderOutcome::Timeout => "timeout",
        }
    }
}

/// Read-only status snapshot returned by `GetStatus`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsView {
    pub total_requests: u64,
    pub instant_requests: u64,
    pub deferred_requests: u64,
    pub average_latency_ms: f64,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub provider_failures: u64,
    pub provider_timeouts: u64,
    pub active_sessions: u64,
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub sessions_swept: u64,
    pub deferred_discarded: u64,
    pub notifications_dropped: u64,
    pub uptime_seconds: u64,
}

#[derive(Default)]
struct Counters {
    instant_requests: AtomicU64,
    deferred_requests: AtomicU64,
    provider_successes: AtomicU64,
    provider_failures: AtomicU64,
    provider_timeouts: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    sessions_swept: AtomicU64,
    deferred_discarded: AtomicU64,
    notifications_dropped: AtomicU64,
}

struct PrometheusMirror {
    registry: Registry,
    requests: IntCounterVec,
    provider_outcomes: IntCounterVec,
    active_sessions: IntGauge,
    phase_latency: HistogramVec,
}

impl PrometheusMirror {
    fn build() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("feedback_requests_total", "Phase executions per phase"),
            &["phase"],
        )?;
        let provider_outcomes = IntCounterVec::new(
            Opts::new("feedback_provider_outcomes_total", "Provider outcomes per provider"),
            &["provider", "outcome"],
        )?;
        let active_sessions = IntGauge::new("feedback_active_sessions", "Live feedback sessions")?;
        let phase_latency = HistogramVec::new(
            HistogramOpts::new("feedback_phase_latency_seconds", "Phase execution latency")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["phase"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(provider_outcomes.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(phase_latency.clone()))?;

        Ok(Self {
            registry,
            requests,
            provider_outcomes,
            active_sessions,
            phase_latency,
        })
    }
}

pub struct MetricsAggregator {
    counters: Counters,
    average_latency_ms: Mutex<Option<f64>>,
    started_at: Instant,
    prometheus: Option<PrometheusMirror>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        let prometheus = match PrometheusMirror::build() {
            Ok(mirror) => Some(mirror),
            Err(e) => {
                warn!("Prometheus mirror disabled: {}", e);
                None
            }
        };

        Self {
            counters: Counters::default(),
            average_latency_ms: Mutex::new(None),
            started_at: Instant::now(),
            prometheus,
        }
    }

    pub fn record_phase(&self, phase: Phase, latency: Duration) {
        match phase {
            Phase::Instant => self.counters.instant_requests.fetch_add(1, Ordering::Relaxed),
            Phase::Deferred => self.counters.deferred_requests.fetch_add(1, Ordering::Relaxed),
        };

        let sample = latency.as_secs_f64() * 1000.0;
        {
            let mut average = self
                .average_latency_ms
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *average = Some(match *average {
                None => sample,
                Some(previous) => LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * previous,
            });
        }

        if let Some(mirror) = &self.prometheus {
            mirror.requests.with_label_values(&[phase.as_str()]).inc();
            mirror
                .phase_latency
                .with_label_values(&[phase.as_str()])
                .observe(latency.as_secs_f64());
        }
    }

    pub fn record_provider(&self, provider_id: &str, outcome: ProviderOutcome) {
        match outcome {
            ProviderOutcome::Success => {
                self.counters.provider_successes.fetch_add(1, Ordering::Relaxed);
            }
            ProviderOutcome::CacheHit => {
                self.counters.provider_successes.fetch_add(1, Ordering::Relaxed);
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            }
            ProviderOutcome::Failure => {
                self.counters.provider_failures.fetch_add(1, Ordering::Relaxed);
            }
            ProviderOutcome::Timeout => {
                self.counters.provider_timeouts.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(mirror) = &self.prometheus {
            mirror
                .provider_outcomes
                .with_label_values(&[provider_id, outcome.label()])
                .inc();
        }
    }

    pub fn record_cache_miss(&self) {
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_started(&self) {
        self.counters.sessions_started.fetch_add(1, Ordering::Relaxed);
        if let Some(mirror) = &self.prometheus {
            mirror.active_sessions.inc();
        }
    }

    pub fn session_ended(&self, swept: bool) {
        self.counters.sessions_ended.fetch_add(1, Ordering::Relaxed);
        if swept {
            self.counters.sessions_swept.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(mirror) = &self.prometheus {
            mirror.active_sessions.dec();
        }
    }

    pub fn deferred_discarded(&self) {
        self.counters.deferred_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notifications_dropped(&self, count: u64) {
        self.counters.notifications_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsView {
        let c = &self.counters;
        let instant = c.instant_requests.load(Ordering::Relaxed);
        let deferred = c.deferred_requests.load(Ordering::Relaxed);
        let successes = c.provider_successes.load(Ordering::Relaxed);
        let failures = c.provider_failures.load(Ordering::Relaxed);
        let timeouts = c.provider_timeouts.load(Ordering::Relaxed);
        let hits = c.cache_hits.load(Ordering::Relaxed);
        let misses = c.cache_misses.load(Ordering::Relaxed);
        let started = c.sessions_started.load(Ordering::Relaxed);
        let ended = c.sessions_ended.load(Ordering::Relaxed);

        let outcomes = successes + failures + timeouts;
        let success_rate = if outcomes == 0 {
            1.0
        } else {
            successes as f64 / outcomes as f64
        };
        let cache_hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };
        let average_latency_ms = self
            .average_latency_ms
            .lock()
            .map(|average| average.unwrap_or(0.0))
            .unwrap_or_else(|poisoned| poisoned.into_inner().unwrap_or(0.0));

        MetricsView {
            total_requests: instant + deferred,
            instant_requests: instant,
            deferred_requests: deferred,
            average_latency_ms,
            success_rate,
            cache_hit_rate,
            cache_hits: hits,
            cache_misses: misses,
            provider_failures: failures,
            provider_timeouts: timeouts,
            active_sessions: started.saturating_sub(ended),
            sessions_started: started,
            sessions_ended: ended,
            sessions_swept: c.sessions_swept.load(Ordering::Relaxed),
            deferred_discarded: c.deferred_discarded.load(Ordering::Relaxed),
            notifications_dropped: c.notifications_dropped.load(Ordering::Relaxed),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Prometheus text exposition of the mirrored counters.
    pub fn render_prometheus(&self) -> anyhow::Result<String> {
        let mirror = self
            .prometheus
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("prometheus mirror is disabled"))?;

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&mirror.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let metrics = MetricsAggregator::new();
        let view = metrics.snapshot();
        assert_eq!(view.total_requests, 0);
        assert_eq!(view.average_latency_ms, 0.0);
        assert_eq!(view.success_rate, 1.0);
        assert_eq!(view.cache_hit_rate, 0.0);
    }

    #[test]
    fn test_latency_average_is_deterministic_ema() {
        let metrics = MetricsAggregator::new();
        metrics.record_phase(Phase::Instant, Duration::from_millis(10));
        assert!((metrics.snapshot().average_latency_ms - 10.0).abs() < 1e-9);

        metrics.record_phase(Phase::Deferred, Duration::from_millis(110));
        // 0.2 * 110 + 0.8 * 10
        assert!((metrics.snapshot().average_latency_ms - 30.0).abs() < 1e-9);

        metrics.record_phase(Phase::Instant, Duration::from_millis(30));
        assert!((metrics.snapshot().average_latency_ms - 30.0).abs() < 1e-9);

        let view = metrics.snapshot();
        assert_eq!(view.total_requests, 3);
        assert_eq!(view.instant_requests, 2);
        assert_eq!(view.deferred_requests, 1);
    }

    #[test]
    fn test_rates() {
        let metrics = MetricsAggregator::new();
        metrics.record_provider("syntax", ProviderOutcome::Success);
        metrics.record_cache_miss();
        metrics.record_provider("syntax", ProviderOutcome::CacheHit);
        metrics.record_provider("patterns", ProviderOutcome::Failure);
        metrics.record_cache_miss();
        metrics.record_provider("llm", ProviderOutcome::Timeout);
        metrics.record_cache_miss();

        let view = metrics.snapshot();
        assert_eq!(view.success_rate, 0.5);
        assert_eq!(view.cache_hit_rate, 0.25);
        assert_eq!(view.provider_failures, 1);
        assert_eq!(view.provider_timeouts, 1);
    }

    #[test]
    fn test_session_gauges() {
        let metrics = MetricsAggregator::new();
        metrics.session_started();
        metrics.session_started();
        metrics.session_ended(true);

        let view = metrics.snapshot();
        assert_eq!(view.active_sessions, 1);
        assert_eq!(view.sessions_swept, 1);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = MetricsAggregator::new();
        metrics.record_phase(Phase::Instant, Duration::from_millis(5));
        metrics.record_provider("syntax", ProviderOutcome::Success);

        let text = metrics.render_prometheus().unwrap();
        assert!(text.contains("feedback_requests_total"));
        assert!(text.contains("provider=\"syntax\""));
    }
}
