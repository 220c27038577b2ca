//! The feedback engine
//!
//! `FeedbackEngine` owns every component by explicit construction: session
//! table, provider registry, content cache, debounce scheduler, history,
//! notification hub and metrics. Instant feedback is computed while holding
//! the session lock; deferred feedback is computed off the lock by the
//! deferred worker and delivered through the session's notification channel.

use anyhow::Context;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache_management::{CacheStats, ContentCache, ContentCacheConfig};
use crate::config::{EngineConfig, FeedbackLevel, SessionConfig};
use crate::error::FeedbackError;
use crate::feedback::{
    ChangeEvent, Feedback, FeedbackId, FeedbackMetadata, FeedbackPartition, Phase, ProviderTiming,
    SessionId,
};
use crate::feedback_engine::aggregator::{FanOutAggregator, PhaseOutcome};
use crate::feedback_engine::debounce::{DebounceKey, DebounceScheduler, Fired};
use crate::feedback_engine::deferred_worker::{spawn_deferred_worker, DeferredJob};
use crate::feedback_engine::session_manager::{
    LastEvent, SessionHandle, SessionManager, SessionMetrics, SessionState, SessionView,
};
use crate::feedback_engine::validation::validate_change;
use crate::history::{HistoryStore, InMemoryHistoryStore};
use crate::metrics::{MetricsAggregator, MetricsView};
use crate::notifications::{FeedbackReceiver, NotificationHub, PublishOutcome};
use crate::providers::{ProviderInput, ProviderRegistry};

pub(crate) struct EngineCore {
    config: EngineConfig,
    registry: ProviderRegistry,
    sessions: SessionManager,
    scheduler: DebounceScheduler<DeferredJob>,
    aggregator: FanOutAggregator,
    cache: Arc<ContentCache>,
    history: Arc<dyn HistoryStore>,
    notifications: NotificationHub,
    metrics: Arc<MetricsAggregator>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl EngineCore {
    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn session(&self, session_id: &SessionId) -> Result<Arc<SessionHandle>, FeedbackError> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| FeedbackError::SessionNotFound(session_id.clone()))
    }

    fn build_feedback(
        event: &ChangeEvent,
        input: &ProviderInput,
        id: FeedbackId,
        instant: FeedbackPartition,
        deferred: Option<FeedbackPartition>,
        provider_timings: Vec<ProviderTiming>,
        processing: Duration,
    ) -> Feedback {
        Feedback {
            id,
            session_id: event.session_id.clone(),
            file_path: event.file_path.clone(),
            timestamp: Utc::now(),
            instant,
            deferred,
            metadata: FeedbackMetadata {
                change_kind: event.kind,
                processing_ms: processing.as_millis() as u64,
                content_hash: input.content_hash().to_hex(),
                provider_timings,
            },
        }
    }

    /// Per-provider timings are only reported at the verbose level.
    fn timings_for(level: FeedbackLevel, timings: Vec<ProviderTiming>) -> Vec<ProviderTiming> {
        if level == FeedbackLevel::Verbose {
            timings
        } else {
            Vec::new()
        }
    }

    async fn process_change(&self, event: ChangeEvent) -> Result<Feedback, FeedbackError> {
        validate_change(&event, self.config.max_content_bytes)?;

        let handle = self.session(&event.session_id)?;
        let mut state = handle.state.lock().await;
        if handle.is_ended() {
            return Err(FeedbackError::SessionNotFound(event.session_id.clone()));
        }

        let started = Instant::now();
        state.touch(started);
        state.current_file = Some(event.file_path.clone());

        let input = Arc::new(ProviderInput::from_event(&event));
        let providers = self.registry.select(Phase::Instant, &state.config);
        let PhaseOutcome {
            partition, timings, ..
        } = self
            .aggregator
            .run_phase(
                Phase::Instant,
                &providers,
                Arc::clone(&input),
                self.config.instant_deadline(),
            )
            .await;

        let level = state.config.feedback_level;
        let processing = started.elapsed();
        let feedback = Self::build_feedback(
            &event,
            &input,
            FeedbackId::generate(),
            partition.filtered(level),
            None,
            Self::timings_for(level, timings),
            processing,
        );

        state.metrics.record_change(processing);
        self.history.append(&handle.id, feedback.clone());

        let event = Arc::new(event);
        state.last_events.insert(
            event.file_path.clone(),
            LastEvent {
                event: Arc::clone(&event),
                feedback_id: feedback.id,
            },
        );

        if state.config.auto_triggers && self.registry.has_enabled(Phase::Deferred, &state.config) {
            let key = DebounceKey::new(handle.id.clone(), event.file_path.clone());
            let delay = state.config.debounce_delay(&self.config);
            let generation = self.scheduler.schedule(
                key,
                DeferredJob {
                    event,
                    feedback_id: feedback.id,
                },
                delay,
            );
            debug!(
                "Armed deferred run for {}:{} in {:?} (generation {})",
                handle.id, feedback.file_path, delay, generation
            );
        }

        Ok(feedback)
    }

    pub(crate) async fn run_deferred(&self, fired: Fired<DeferredJob>) {
        let Fired {
            key,
            generation,
            payload: job,
        } = fired;

        let Some(handle) = self.sessions.get(&key.session_id) else {
            self.metrics.deferred_discarded();
            debug!("Session {} gone before deferred run", key.session_id);
            return;
        };
        if handle.is_ended() {
            self.metrics.deferred_discarded();
            return;
        }

        let config = handle.state.lock().await.config.clone();
        let providers = self.registry.select(Phase::Deferred, &config);
        if providers.is_empty() {
            debug!("No deferred providers enabled for session {}", key.session_id);
            return;
        }

        let input = Arc::new(ProviderInput::from_event(&job.event));
        let outcome = self
            .aggregator
            .run_phase(
                Phase::Deferred,
                &providers,
                Arc::clone(&input),
                self.config.deferred_deadline(),
            )
            .await;

        let mut state = handle.state.lock().await;
        if handle.is_ended() {
            self.metrics.deferred_discarded();
            info!(
                "Discarding deferred result for ended session {} ({})",
                key.session_id, key.file_path
            );
            return;
        }
        if !state.accept_deferred(&key.file_path, generation) {
            self.metrics.deferred_discarded();
            debug!(
                "Discarding stale deferred result for {}:{} (generation {})",
                key.session_id, key.file_path, generation
            );
            return;
        }

        let level = state.config.feedback_level;
        let feedback = Self::build_feedback(
            &job.event,
            &input,
            job.feedback_id,
            FeedbackPartition::empty(Phase::Instant),
            Some(outcome.partition.filtered(level)),
            Self::timings_for(level, outcome.timings),
            outcome.duration,
        );

        state.metrics.record_deferred(outcome.duration);
        self.history.append(&handle.id, feedback.clone());
        match self.notifications.publish(&handle.id, feedback) {
            PublishOutcome::Delivered => {}
            PublishOutcome::DroppedOldest => self.metrics.notifications_dropped(1),
            PublishOutcome::NoChannel => {
                debug!("No notification channel for session {}", handle.id)
            }
        }
    }

    /// Tear down an ended session. Caller holds the session lock and has
    /// already removed the handle from the table.
    fn finish_session(&self, handle: &SessionHandle, state: &mut SessionState, swept: bool) {
        handle.mark_ended(state);
        let cancelled = self.scheduler.cancel_session(&handle.id);
        self.history.clear(&handle.id);
        self.notifications.close(&handle.id);
        self.metrics.session_ended(swept);

        info!(
            "Session {} {} ({} changes, {} pending deferred runs cancelled)",
            handle.id,
            if swept { "reclaimed as idle" } else { "ended" },
            state.metrics.changes_processed,
            cancelled
        );
    }

    fn sweep_idle_sessions_at(&self, now: Instant) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let mut swept = 0;

        for handle in self.sessions.idle_sessions(now, idle_timeout) {
            let Ok(mut state) = handle.state.try_lock() else {
                continue;
            };
            if handle.is_ended() || state.idle_for(now) < idle_timeout {
                continue;
            }
            if !self.sessions.remove_if_same(&handle) {
                continue;
            }
            self.finish_session(&handle, &mut state, true);
            swept += 1;
        }

        swept
    }
}

/// Real-time multi-provider feedback engine.
///
/// Must be constructed inside a tokio runtime; the deferred worker is
/// spawned on it.
pub struct FeedbackEngine {
    core: Arc<EngineCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FeedbackEngine {
    pub fn new(config: EngineConfig, registry: ProviderRegistry) -> anyhow::Result<Self> {
        let history = Arc::new(InMemoryHistoryStore::new(config.default_max_history));
        Self::with_history_store(config, registry, history)
    }

    pub fn with_history_store(
        config: EngineConfig,
        registry: ProviderRegistry,
        history: Arc<dyn HistoryStore>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .context("FeedbackEngine must be created inside a tokio runtime")?;

        let metrics = Arc::new(MetricsAggregator::new());
        let cache = Arc::new(ContentCache::new(ContentCacheConfig::from_engine(&config)));
        let (scheduler, fired_rx) = DebounceScheduler::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let core = Arc::new(EngineCore {
            aggregator: FanOutAggregator::new(Arc::clone(&cache), Arc::clone(&metrics)),
            notifications: NotificationHub::new(config.notification_capacity),
            sessions: SessionManager::new(),
            scheduler,
            cache,
            history,
            metrics,
            registry,
            config,
            shutdown_tx,
            shutdown_rx: shutdown_rx.clone(),
        });

        let worker = spawn_deferred_worker(Arc::clone(&core), fired_rx, shutdown_rx);
        info!(
            "Feedback engine started with providers: {}",
            core.registry.ids().join(", ")
        );

        Ok(Self {
            core,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Start a session; always succeeds with a fresh id.
    pub fn start_session(&self, user_id: &str, config: SessionConfig) -> SessionId {
        let core = &self.core;
        let capacity = config.history_capacity(&core.config);
        let handle = core.sessions.create(user_id, config);

        core.history.set_capacity(&handle.id, capacity);
        core.notifications.open(&handle.id);
        core.metrics.session_started();

        info!("Started session {} for user {}", handle.id, user_id);
        handle.id.clone()
    }

    /// End a session, returning its cumulative metrics. Pending deferred runs
    /// are cancelled and in-flight ones discarded on completion.
    pub async fn end_session(&self, session_id: &SessionId) -> Result<SessionMetrics, FeedbackError> {
        let handle = self
            .core
            .sessions
            .remove(session_id)
            .ok_or_else(|| FeedbackError::SessionNotFound(session_id.clone()))?;

        let mut state = handle.state.lock().await;
        self.core.finish_session(&handle, &mut state, false);
        Ok(state.metrics.clone())
    }

    pub async fn session_info(&self, session_id: &SessionId) -> Option<SessionView> {
        let handle = self.core.sessions.get(session_id)?;
        let state = handle.state.lock().await;
        if handle.is_ended() {
            return None;
        }
        let history_len = self.core.history.len(session_id);
        Some(SessionView::from_state(&handle, &state, history_len))
    }

    /// Replace a live session's configuration. A smaller history capacity
    /// evicts the oldest entries immediately.
    pub async fn update_session_config(
        &self,
        session_id: &SessionId,
        config: SessionConfig,
    ) -> Result<(), FeedbackError> {
        let handle = self.core.session(session_id)?;
        let mut state = handle.state.lock().await;
        if handle.is_ended() {
            return Err(FeedbackError::SessionNotFound(session_id.clone()));
        }

        let capacity = config.history_capacity(&self.core.config);
        self.core.history.set_capacity(session_id, capacity);
        state.config = config;
        debug!("Updated configuration of session {}", session_id);
        Ok(())
    }

    /// Run the instant phase for a change and return its feedback. The
    /// deferred phase, if enabled, is delivered later through `subscribe`.
    pub async fn process_change(&self, event: ChangeEvent) -> Result<Feedback, FeedbackError> {
        self.core.process_change(event).await
    }

    /// Run the deferred phase now on the latest content seen for
    /// `file_path`. Returns false when the session has no change for it.
    pub async fn trigger_deferred(
        &self,
        session_id: &SessionId,
        file_path: &str,
    ) -> Result<bool, FeedbackError> {
        let handle = self.core.session(session_id)?;
        let state = handle.state.lock().await;
        if handle.is_ended() {
            return Err(FeedbackError::SessionNotFound(session_id.clone()));
        }

        let Some(last) = state.last_events.get(file_path) else {
            return Ok(false);
        };
        let job = DeferredJob {
            event: Arc::clone(&last.event),
            feedback_id: last.feedback_id,
        };
        self.core
            .scheduler
            .fire_now(DebounceKey::new(session_id.clone(), file_path), job);
        Ok(true)
    }

    /// Up to `limit` most recent feedback entries, oldest first.
    pub fn history(&self, session_id: &SessionId, limit: Option<usize>) -> Result<Vec<Feedback>, FeedbackError> {
        let handle = self.core.session(session_id)?;
        if handle.is_ended() {
            return Err(FeedbackError::SessionNotFound(session_id.clone()));
        }
        Ok(self.core.history.get(session_id, limit.unwrap_or(usize::MAX)))
    }

    pub fn subscribe(&self, session_id: &SessionId) -> Result<FeedbackReceiver, FeedbackError> {
        self.core
            .notifications
            .subscribe(session_id)
            .ok_or_else(|| FeedbackError::SessionNotFound(session_id.clone()))
    }

    pub fn status(&self) -> MetricsView {
        self.core.metrics.snapshot()
    }

    pub fn render_prometheus(&self) -> anyhow::Result<String> {
        self.core.metrics.render_prometheus()
    }

    /// End every session idle for longer than the configured timeout.
    /// Sessions busy with a change are left for the next sweep.
    pub fn sweep_idle_sessions(&self) -> usize {
        self.core.sweep_idle_sessions_at(Instant::now())
    }

    /// Run `sweep_idle_sessions` every `sweep_interval_seconds` until shutdown.
    pub fn spawn_idle_sweeper(&self) -> JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let mut shutdown = core.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(core.config.sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = core.sweep_idle_sessions_at(Instant::now());
                        if swept > 0 {
                            info!("Idle sweep reclaimed {} sessions", swept);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Idle sweeper stopped");
        })
    }

    pub fn cache(&self) -> &ContentCache {
        &self.core.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.core.cache.stats()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.core.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn active_sessions(&self) -> usize {
        self.core.sessions.len()
    }

    /// Stop the deferred worker and idle sweepers and drop pending timers.
    /// Sessions stay readable; no further deferred feedback is produced.
    pub async fn shutdown(&self) {
        let _ = self.core.shutdown_tx.send(true);
        let cancelled = self.core.scheduler.cancel_all();

        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        info!("Feedback engine shut down ({} pending deferred runs dropped)", cancelled);
    }
}

impl Drop for FeedbackEngine {
    fn drop(&mut self) {
        let _ = self.core.shutdown_tx.send(true);
        self.core.scheduler.cancel_all();
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(worker) = worker.take() {
                worker.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::feedback::{Category, ChangeKind, CursorPosition, Finding, Severity};
    use crate::providers::FeedbackProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Helper function to create a test EngineConfig with fixed values
    fn create_test_config() -> EngineConfig {
        EngineConfig {
            instant_deadline_ms: 50,
            deferred_deadline_ms: 5_000,
            default_debounce_ms: 100,
            default_max_history: 50,
            cache_capacity: 128,
            idle_timeout_seconds: 60,
            sweep_interval_seconds: 10,
            notification_capacity: 8,
            max_content_bytes: 64 * 1024,
            max_concurrent_deferred: 2,
            llm_backend_url: None,
            llm_timeout_seconds: 5,
        }
    }

    struct SlowDeferred {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FeedbackProvider for SlowDeferred {
        fn id(&self) -> &str {
            "slow-deferred"
        }

        fn phase(&self) -> Phase {
            Phase::Deferred
        }

        async fn run(&self, input: &ProviderInput) -> Result<Vec<Finding>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = if input.content.starts_with("fast") {
                Duration::from_millis(10)
            } else {
                self.delay
            };
            tokio::time::sleep(delay).await;
            Ok(vec![Finding::new(Category::Semantic, Severity::Info, input.content.clone())])
        }
    }

    fn engine_with_slow_deferred(delay: Duration) -> (FeedbackEngine, Arc<SlowDeferred>) {
        let provider = Arc::new(SlowDeferred {
            delay,
            calls: AtomicUsize::new(0),
        });
        let mut registry = ProviderRegistry::with_builtin(&create_test_config()).unwrap();
        registry.register(provider.clone()).unwrap();
        (FeedbackEngine::new(create_test_config(), registry).unwrap(), provider)
    }

    fn change(session: &SessionId, content: &str) -> ChangeEvent {
        ChangeEvent::new(
            session.clone(),
            "Token.sol",
            content,
            CursorPosition::default(),
            ChangeKind::Edit,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_result_for_ended_session_is_discarded() {
        let (engine, provider) = engine_with_slow_deferred(Duration::from_secs(1));
        let session = engine.start_session("u1", SessionConfig::default());

        engine.process_change(change(&session, "contract A {}")).await.unwrap();
        // debounce settles at 100ms; the slow provider is now in flight
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        engine.end_session(&session).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let status = engine.status();
        assert_eq!(status.deferred_discarded, 1);
        assert_eq!(status.active_sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_notification_completes_instant_feedback() {
        let (engine, _) = engine_with_slow_deferred(Duration::from_millis(10));
        let session = engine.start_session("u1", SessionConfig::default());
        let rx = engine.subscribe(&session).unwrap();

        let instant = engine.process_change(change(&session, "contract A {}")).await.unwrap();
        assert!(instant.deferred.is_none());

        let deferred = rx.recv().await.unwrap();
        assert_eq!(deferred.id, instant.id);
        assert!(deferred.instant.is_empty());
        let partition = deferred.deferred.as_ref().unwrap();
        assert!(partition.result_for("security").is_some());
        assert!(partition.result_for("slow-deferred").is_some());

        let history = engine.history(&session, None).unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_deferred());
        assert!(history[1].is_deferred());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_deferred_results_are_not_delivered() {
        let (engine, provider) = engine_with_slow_deferred(Duration::from_millis(500));
        let session = engine.start_session("u1", SessionConfig::default());
        let rx = engine.subscribe(&session).unwrap();

        // the first window settles and starts a slow run
        engine.process_change(change(&session, "slow one")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        // the second window's run overtakes it
        engine.process_change(change(&session, "fast two")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        let delivered = rx.try_recv().unwrap();
        let message = delivered
            .deferred
            .as_ref()
            .and_then(|d| d.result_for("slow-deferred"))
            .map(|r| r.findings[0].message.clone());
        assert_eq!(message.as_deref(), Some("fast two"));
        assert!(rx.try_recv().is_none());
        assert_eq!(engine.status().deferred_discarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verbose_level_reports_provider_timings() {
        let (engine, _) = engine_with_slow_deferred(Duration::from_millis(10));
        let quiet = engine.start_session("u1", SessionConfig::default());
        let verbose = engine.start_session(
            "u1",
            SessionConfig::default().with_level(FeedbackLevel::Verbose),
        );

        let normal = engine.process_change(change(&quiet, "contract A {}")).await.unwrap();
        assert!(normal.metadata.provider_timings.is_empty());

        let detailed = engine.process_change(change(&verbose, "contract A {}")).await.unwrap();
        let ids: Vec<&str> = detailed
            .metadata
            .provider_timings
            .iter()
            .map(|t| t.provider_id.as_str())
            .collect();
        assert_eq!(ids, vec!["syntax", "patterns", "completion"]);
        // second session reuses the first session's results
        assert!(detailed.metadata.provider_timings.iter().all(|t| t.cache_hit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_without_auto_triggers() {
        let (engine, provider) = engine_with_slow_deferred(Duration::from_millis(10));
        let session = engine.start_session("u1", SessionConfig::default().with_auto_triggers(false));
        let rx = engine.subscribe(&session).unwrap();

        assert!(!engine.trigger_deferred(&session, "Token.sol").await.unwrap());

        let instant = engine.process_change(change(&session, "contract A {}")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        assert!(engine.trigger_deferred(&session, "Token.sol").await.unwrap());
        let deferred = rx.recv().await.unwrap();
        assert_eq!(deferred.id, instant.id);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_history_capacity_evicts_immediately() {
        let (engine, _) = engine_with_slow_deferred(Duration::from_millis(10));
        let config = SessionConfig::default().with_auto_triggers(false);
        let session = engine.start_session("u1", config.clone());

        for i in 0..5 {
            engine
                .process_change(change(&session, &format!("contract A{} {{}}", i)))
                .await
                .unwrap();
        }
        engine
            .update_session_config(&session, config.with_max_history(2))
            .await
            .unwrap();

        let history = engine.history(&session, None).unwrap();
        assert_eq!(history.len(), 2);
        let newest = ProviderInput::from_event(&change(&session, "contract A4 {}"));
        assert_eq!(history[1].metadata.content_hash, newest.content_hash().to_hex());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweep_reclaims_sessions() {
        let (engine, _) = engine_with_slow_deferred(Duration::from_millis(10));
        let idle = engine.start_session("u1", SessionConfig::default());
        let active = engine.start_session("u2", SessionConfig::default());

        tokio::time::advance(Duration::from_secs(45)).await;
        engine.process_change(change(&active, "x")).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(engine.sweep_idle_sessions(), 1);
        assert!(engine.session_info(&idle).await.is_none());
        assert!(engine.session_info(&active).await.is_some());
        assert!(matches!(
            engine.process_change(change(&idle, "x")).await,
            Err(FeedbackError::SessionNotFound(_))
        ));
        assert_eq!(engine.status().sessions_swept, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_runs_until_shutdown() {
        let (engine, _) = engine_with_slow_deferred(Duration::from_millis(10));
        let session = engine.start_session("u1", SessionConfig::default());
        let sweeper = engine.spawn_idle_sweeper();

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(engine.session_info(&session).await.is_none());

        engine.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_not_blocked_by_saturated_worker() {
        let mut config = create_test_config();
        config.max_concurrent_deferred = 1;
        let provider = Arc::new(SlowDeferred {
            delay: Duration::from_secs(10),
            calls: AtomicUsize::new(0),
        });
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone()).unwrap();
        let engine = FeedbackEngine::new(config, registry).unwrap();
        let session = engine.start_session("u1", SessionConfig::default().with_auto_triggers(false));

        for file in ["A.sol", "B.sol"] {
            let event = ChangeEvent::new(
                session.clone(),
                file,
                "contract A {}",
                CursorPosition::default(),
                ChangeKind::Edit,
            );
            engine.process_change(event).await.unwrap();
            assert!(engine.trigger_deferred(&session, file).await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        engine.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        // the job waiting for a permit is dropped once the permit frees up
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_engine_rejects_invalid_config() {
        let mut config = create_test_config();
        config.cache_capacity = 0;
        assert!(FeedbackEngine::new(config, ProviderRegistry::new()).is_err());
    }

    #[test]
    fn test_engine_requires_runtime() {
        let err = FeedbackEngine::new(create_test_config(), ProviderRegistry::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("tokio runtime"));
    }
}
