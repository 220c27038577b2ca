//! Concurrent fan-out of one phase across its providers
//!
//! Each cache miss runs on its own task under the phase deadline. A provider
//! that errors, panics or overruns is reported as a failure entry in its slot
//! and never affects its siblings. Overrunning tasks are detached, not
//! aborted, so a late success still lands in the cache for the next request.
//!
//! A (provider, content) pair runs at most once only across sequential
//! requests. In-flight runs are not coalesced: concurrent misses for the same
//! pair each invoke the provider, and the last one to finish wins the cache
//! slot.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::cache_management::ContentCache;
use crate::error::ProviderError;
use crate::feedback::{FailureKind, FeedbackPartition, Phase, ProviderResult, ProviderTiming};
use crate::metrics::{MetricsAggregator, ProviderOutcome};
use crate::providers::{FeedbackProvider, ProviderInput};

/// Joined output of one phase execution.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub partition: FeedbackPartition,
    pub timings: Vec<ProviderTiming>,
    pub duration: Duration,
}

pub struct FanOutAggregator {
    cache: Arc<ContentCache>,
    metrics: Arc<MetricsAggregator>,
}

impl FanOutAggregator {
    pub fn new(cache: Arc<ContentCache>, metrics: Arc<MetricsAggregator>) -> Self {
        Self { cache, metrics }
    }

    /// Run `providers` against `input`; results keep the providers' order.
    pub async fn run_phase(
        &self,
        phase: Phase,
        providers: &[Arc<dyn FeedbackProvider>],
        input: Arc<ProviderInput>,
        deadline: Duration,
    ) -> PhaseOutcome {
        let started = Instant::now();

        let runs = providers
            .iter()
            .map(|provider| self.run_provider(Arc::clone(provider), Arc::clone(&input), deadline));
        let (results, timings): (Vec<_>, Vec<_>) = join_all(runs).await.into_iter().unzip();

        let duration = started.elapsed();
        self.metrics.record_phase(phase, duration);
        debug!(
            "{} phase for {} finished in {:?} ({} providers)",
            phase,
            input.file_path,
            duration,
            results.len()
        );

        PhaseOutcome {
            partition: FeedbackPartition { phase, results },
            timings,
            duration,
        }
    }

    async fn run_provider(
        &self,
        provider: Arc<dyn FeedbackProvider>,
        input: Arc<ProviderInput>,
        deadline: Duration,
    ) -> (ProviderResult, ProviderTiming) {
        let started = Instant::now();
        let provider_id = provider.id().to_string();
        let hash = input.cache_key(provider.as_ref());

        match self.cache.get(&provider_id, &hash) {
            Ok(Some(result)) => {
                self.metrics.record_provider(&provider_id, ProviderOutcome::CacheHit);
                let timing = Self::timing(&provider_id, started, true);
                return (result, timing);
            }
            Ok(None) => {}
            Err(e) => warn!("{} while looking up {}; treating as a miss", e, provider_id),
        }
        self.metrics.record_cache_miss();

        let cache = Arc::clone(&self.cache);
        let task_provider_id = provider_id.clone();
        let handle = tokio::spawn(async move {
            let findings = provider.run(&input).await?;
            let result = ProviderResult::succeeded(task_provider_id.clone(), findings);
            if let Err(e) = cache.put(&task_provider_id, hash, result.clone()) {
                warn!("{} while storing result of {}", e, task_provider_id);
            }
            Ok::<_, ProviderError>(result)
        });

        let result = match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(Ok(result))) => {
                self.metrics.record_provider(&provider_id, ProviderOutcome::Success);
                result
            }
            Ok(Ok(Err(e))) => {
                warn!("Provider {} failed: {}", provider_id, e);
                let (outcome, kind) = if e.is_timeout() {
                    (ProviderOutcome::Timeout, FailureKind::Timeout)
                } else {
                    (ProviderOutcome::Failure, FailureKind::Failure)
                };
                self.metrics.record_provider(&provider_id, outcome);
                ProviderResult::failed(&provider_id, kind, e.to_string())
            }
            Ok(Err(join_error)) => {
                let e = if join_error.is_panic() {
                    ProviderError::Panicked(join_error.to_string())
                } else {
                    ProviderError::failed("provider task was cancelled")
                };
                error!("Provider {} crashed: {}", provider_id, e);
                self.metrics.record_provider(&provider_id, ProviderOutcome::Failure);
                ProviderResult::failed(&provider_id, FailureKind::Failure, e.to_string())
            }
            Err(_) => {
                let e = ProviderError::Timeout {
                    deadline_ms: deadline.as_millis() as u64,
                };
                warn!("Provider {} timed out, detaching: {}", provider_id, e);
                self.metrics.record_provider(&provider_id, ProviderOutcome::Timeout);
                ProviderResult::failed(&provider_id, FailureKind::Timeout, e.to_string())
            }
        };

        let timing = Self::timing(&provider_id, started, false);
        (result, timing)
    }

    fn timing(provider_id: &str, started: Instant, cache_hit: bool) -> ProviderTiming {
        ProviderTiming {
            provider_id: provider_id.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            cache_hit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{Category, ChangeEvent, ChangeKind, CursorPosition, Finding, SessionId, Severity};
    use crate::providers::SyntaxProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Succeed,
        Fail,
        Sleep(Duration),
        Panic,
    }

    struct TestProvider {
        id: &'static str,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl TestProvider {
        fn new(id: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedbackProvider for TestProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn phase(&self) -> Phase {
            Phase::Instant
        }

        async fn run(&self, _input: &ProviderInput) -> Result<Vec<Finding>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => Ok(vec![Finding::new(Category::Syntax, Severity::Info, self.id)]),
                Behavior::Fail => Err(ProviderError::failed("analyzer crashed")),
                Behavior::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(vec![Finding::new(Category::Syntax, Severity::Info, "late")])
                }
                Behavior::Panic => panic!("provider bug"),
            }
        }
    }

    fn input(content: &str) -> Arc<ProviderInput> {
        input_at("Token.sol", content)
    }

    fn input_at(file_path: &str, content: &str) -> Arc<ProviderInput> {
        Arc::new(ProviderInput::from_event(&ChangeEvent::new(
            SessionId::from("s"),
            file_path,
            content,
            CursorPosition::default(),
            ChangeKind::Edit,
        )))
    }

    fn aggregator() -> (FanOutAggregator, Arc<ContentCache>, Arc<MetricsAggregator>) {
        let cache = Arc::new(ContentCache::with_capacity(64));
        let metrics = Arc::new(MetricsAggregator::new());
        (
            FanOutAggregator::new(Arc::clone(&cache), Arc::clone(&metrics)),
            cache,
            metrics,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated_and_ordered() {
        let (aggregator, _, metrics) = aggregator();
        let providers: Vec<Arc<dyn FeedbackProvider>> = vec![
            TestProvider::new("ok", Behavior::Succeed),
            TestProvider::new("broken", Behavior::Fail),
            TestProvider::new("buggy", Behavior::Panic),
            TestProvider::new("slow", Behavior::Sleep(Duration::from_millis(200))),
        ];

        let outcome = aggregator
            .run_phase(Phase::Instant, &providers, input("a"), Duration::from_millis(50))
            .await;

        let ids: Vec<_> = outcome.partition.results.iter().map(|r| r.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["ok", "broken", "buggy", "slow"]);
        assert!(outcome.partition.results[0].success);
        assert_eq!(outcome.partition.failed_providers(), vec!["broken", "buggy", "slow"]);
        assert!(outcome.partition.results[3].is_timeout());
        assert!(!outcome.partition.results[1].is_timeout());

        let view = metrics.snapshot();
        assert_eq!(view.provider_failures, 2);
        assert_eq!(view.provider_timeouts, 1);
        assert_eq!(view.instant_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_content_hits_cache() {
        let (aggregator, _, metrics) = aggregator();
        let provider = TestProvider::new("syntax", Behavior::Succeed);
        let providers: Vec<Arc<dyn FeedbackProvider>> = vec![provider.clone()];

        let first = aggregator
            .run_phase(Phase::Instant, &providers, input("same"), Duration::from_millis(50))
            .await;
        let second = aggregator
            .run_phase(Phase::Instant, &providers, input("same"), Duration::from_millis(50))
            .await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(first.partition, second.partition);
        assert!(!first.timings[0].cache_hit);
        assert!(second.timings[0].cache_hit);
        assert_eq!(metrics.snapshot().cache_hit_rate, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let (aggregator, cache, _) = aggregator();
        let provider = TestProvider::new("broken", Behavior::Fail);
        let providers: Vec<Arc<dyn FeedbackProvider>> = vec![provider.clone()];

        for _ in 0..2 {
            aggregator
                .run_phase(Phase::Instant, &providers, input("x"), Duration::from_millis(50))
                .await;
        }
        assert_eq!(provider.calls(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_provider_is_detached_and_still_caches() {
        let (aggregator, cache, _) = aggregator();
        let provider = TestProvider::new("slow", Behavior::Sleep(Duration::from_millis(200)));
        let providers: Vec<Arc<dyn FeedbackProvider>> = vec![provider.clone()];
        let started = Instant::now();

        let outcome = aggregator
            .run_phase(Phase::Deferred, &providers, input("content"), Duration::from_millis(50))
            .await;
        assert!(outcome.partition.results[0].is_timeout());
        assert!(started.elapsed() < Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let hash = input("content").cache_key(provider.as_ref());
        assert!(cache.contains("slow", &hash));

        let again = aggregator
            .run_phase(Phase::Deferred, &providers, input("content"), Duration::from_millis(50))
            .await;
        assert!(again.partition.results[0].success);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_path_sensitive_results_are_not_shared_across_extensions() {
        let (aggregator, _, _) = aggregator();
        let providers: Vec<Arc<dyn FeedbackProvider>> = vec![Arc::new(SyntaxProvider::new())];
        let deadline = Duration::from_millis(50);

        let notes = aggregator
            .run_phase(Phase::Instant, &providers, input_at("notes.md", "contract A {}"), deadline)
            .await;
        assert!(notes.partition.results[0].findings.is_empty());

        let token = aggregator
            .run_phase(Phase::Instant, &providers, input_at("Token.sol", "contract A {}"), deadline)
            .await;
        assert!(!token.timings[0].cache_hit);
        let messages: Vec<&str> = token.partition.findings().map(|f| f.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("pragma")), "{:?}", messages);

        // same path again is served from cache
        let again = aggregator
            .run_phase(Phase::Instant, &providers, input_at("Token.sol", "contract A {}"), deadline)
            .await;
        assert!(again.timings[0].cache_hit);
        assert_eq!(again.partition, token.partition);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_cache_degrades_to_misses() {
        let (aggregator, cache, metrics) = aggregator();
        cache.poison();
        let provider = TestProvider::new("syntax", Behavior::Succeed);
        let providers: Vec<Arc<dyn FeedbackProvider>> = vec![provider.clone()];

        for _ in 0..2 {
            let outcome = aggregator
                .run_phase(Phase::Instant, &providers, input("same"), Duration::from_millis(50))
                .await;
            assert!(outcome.partition.results[0].success);
            assert!(outcome.partition.failed_providers().is_empty());
            assert!(!outcome.timings[0].cache_hit);
        }

        assert_eq!(provider.calls(), 2);
        let view = metrics.snapshot();
        assert_eq!(view.provider_failures, 0);
        assert_eq!(view.cache_hits, 0);
        assert_eq!(view.cache_misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_are_not_coalesced() {
        let (aggregator, _, _) = aggregator();
        let provider = TestProvider::new("slow", Behavior::Sleep(Duration::from_millis(10)));
        let providers: Vec<Arc<dyn FeedbackProvider>> = vec![provider.clone()];
        let deadline = Duration::from_millis(50);

        let (a, b) = tokio::join!(
            aggregator.run_phase(Phase::Instant, &providers, input("shared"), deadline),
            aggregator.run_phase(Phase::Instant, &providers, input("shared"), deadline),
        );
        assert!(a.partition.results[0].success && b.partition.results[0].success);
        assert_eq!(provider.calls(), 2);

        let later = aggregator
            .run_phase(Phase::Instant, &providers, input("shared"), deadline)
            .await;
        assert!(later.timings[0].cache_hit);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_providers_yields_empty_partition() {
        let (aggregator, _, _) = aggregator();
        let outcome = aggregator
            .run_phase(Phase::Deferred, &[], input("x"), Duration::from_millis(50))
            .await;
        assert!(outcome.partition.is_empty());
        assert_eq!(outcome.partition.phase, Phase::Deferred);
    }
}
