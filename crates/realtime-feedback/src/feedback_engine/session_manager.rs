//! Session table and per-session state
//!
//! The state of each session sits behind a fair async mutex, so changes for
//! one session are processed one at a time in arrival order. The `ended`
//! flag is only set while holding that mutex; anything that waited on the
//! lock re-checks it before touching the session.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::SessionConfig;
use crate::feedback::{ChangeEvent, FeedbackId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Active,
    Ended,
}

/// Cumulative per-session counters, returned by `end_session`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub changes_processed: u64,
    pub instant_feedback: u64,
    pub deferred_feedback: u64,
    pub total_latency_ms: u64,
    pub average_latency_ms: f64,
}

impl SessionMetrics {
    pub fn record_change(&mut self, latency: Duration) {
        self.changes_processed += 1;
        self.instant_feedback += 1;
        self.add_latency(latency);
    }

    pub fn record_deferred(&mut self, latency: Duration) {
        self.deferred_feedback += 1;
        self.add_latency(latency);
    }

    pub fn feedback_count(&self) -> u64 {
        self.instant_feedback + self.deferred_feedback
    }

    fn add_latency(&mut self, latency: Duration) {
        self.total_latency_ms += latency.as_millis() as u64;
        let samples = self.feedback_count();
        self.average_latency_ms = if samples == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / samples as f64
        };
    }
}

/// Most recent change per file, kept for deferred runs and explicit triggers.
#[derive(Debug, Clone)]
pub struct LastEvent {
    pub event: Arc<ChangeEvent>,
    pub feedback_id: FeedbackId,
}

pub struct SessionState {
    pub config: SessionConfig,
    pub metrics: SessionMetrics,
    pub status: SessionStatus,
    pub current_file: Option<String>,
    pub last_events: HashMap<String, LastEvent>,
    /// Highest deferred generation delivered per file
    pub delivered_generations: HashMap<String, u64>,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
}

impl SessionState {
    fn new(config: SessionConfig) -> Self {
        Self {
            config,
            metrics: SessionMetrics::default(),
            status: SessionStatus::Created,
            current_file: None,
            last_events: HashMap::new(),
            delivered_generations: HashMap::new(),
            last_activity: Instant::now(),
            last_activity_at: Utc::now(),
        }
    }

    /// Record activity; never moves the activity clock backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
            self.last_activity_at = Utc::now();
        }
        if self.status == SessionStatus::Created {
            self.status = SessionStatus::Active;
        }
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// True when `generation` is newer than anything already delivered for
    /// `file_path`; records it as delivered.
    pub fn accept_deferred(&mut self, file_path: &str, generation: u64) -> bool {
        match self.delivered_generations.get(file_path) {
            Some(&delivered) if delivered >= generation => false,
            _ => {
                self.delivered_generations.insert(file_path.to_string(), generation);
                true
            }
        }
    }
}

pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    ended: AtomicBool,
    pub state: Mutex<SessionState>,
}

impl SessionHandle {
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Must be called while holding `state`.
    pub fn mark_ended(&self, state: &mut SessionState) {
        self.ended.store(true, Ordering::Release);
        state.status = SessionStatus::Ended;
    }
}

/// Read-only view returned by `session_info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: SessionId,
    pub user_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub current_file: Option<String>,
    pub config: SessionConfig,
    pub metrics: SessionMetrics,
    pub history_len: usize,
}

impl SessionView {
    pub fn from_state(handle: &SessionHandle, state: &SessionState, history_len: usize) -> Self {
        Self {
            session_id: handle.id.clone(),
            user_id: handle.user_id.clone(),
            status: state.status,
            created_at: handle.created_at,
            last_activity: state.last_activity_at,
            current_file: state.current_file.clone(),
            config: state.config.clone(),
            metrics: state.metrics.clone(),
            history_len,
        }
    }
}

#[derive(Default)]
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, user_id: &str, config: SessionConfig) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle {
            id: SessionId::generate(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            ended: AtomicBool::new(false),
            state: Mutex::new(SessionState::new(config)),
        });
        self.sessions.insert(handle.id.clone(), Arc::clone(&handle));
        handle
    }

    /// Cloned handle; never hold a table guard across an await.
    pub fn get(&self, session_id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, session_id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.remove(session_id).map(|(_, handle)| handle)
    }

    /// Remove `handle` only if it is still the registered session for its id.
    pub fn remove_if_same(&self, handle: &Arc<SessionHandle>) -> bool {
        self.sessions
            .remove_if(&handle.id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    /// Sessions idle for at least `idle_timeout`. Sessions whose state is
    /// locked are busy processing and skipped.
    pub fn idle_sessions(&self, now: Instant, idle_timeout: Duration) -> Vec<Arc<SessionHandle>> {
        let handles: Vec<Arc<SessionHandle>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        handles
            .into_iter()
            .filter(|handle| match handle.state.try_lock() {
                Ok(state) => state.idle_for(now) >= idle_timeout,
                Err(_) => {
                    debug!("Session {} is busy, skipping idle check", handle.id);
                    false
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}
