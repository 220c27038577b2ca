//! Bounded per-session feedback history

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::feedback::{Feedback, SessionId};

pub const DEFAULT_HISTORY_CAPACITY: usize = 1_000;

/// Storage for past feedback. Entries are kept in append order and evicted
/// oldest-first once a session's capacity is reached.
pub trait HistoryStore: Send + Sync {
    fn append(&self, session_id: &SessionId, feedback: Feedback);
    /// Up to `limit` most recent entries, oldest first.
    fn get(&self, session_id: &SessionId, limit: usize) -> Vec<Feedback>;
    fn clear(&self, session_id: &SessionId);
    fn len(&self, session_id: &SessionId) -> usize;
    /// Evicts immediately when shrinking below the current length.
    fn set_capacity(&self, session_id: &SessionId, capacity: usize);
}

struct SessionHistory {
    entries: VecDeque<Feedback>,
    capacity: usize,
}

impl SessionHistory {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

#[derive(Clone)]
pub struct InMemoryHistoryStore {
    store: Arc<DashMap<SessionId, SessionHistory>>,
    default_capacity: usize,
}

impl InMemoryHistoryStore {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            default_capacity: default_capacity.max(1),
        }
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(&self, session_id: &SessionId, feedback: Feedback) {
        let mut history = self
            .store
            .entry(session_id.clone())
            .or_insert_with(|| SessionHistory::with_capacity(self.default_capacity));
        history.entries.push_back(feedback);
        history.evict_overflow();
    }

    fn get(&self, session_id: &SessionId, limit: usize) -> Vec<Feedback> {
        match self.store.get(session_id) {
            Some(history) => {
                let skip = history.entries.len().saturating_sub(limit);
                history.entries.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    fn clear(&self, session_id: &SessionId) {
        self.store.remove(session_id);
    }

    fn len(&self, session_id: &SessionId) -> usize {
        self.store
            .get(session_id)
            .map(|history| history.entries.len())
            .unwrap_or(0)
    }

    fn set_capacity(&self, session_id: &SessionId, capacity: usize) {
        let mut history = self
            .store
            .entry(session_id.clone())
            .or_insert_with(|| SessionHistory::with_capacity(capacity));
        history.capacity = capacity.max(1);
        history.evict_overflow();
    }
}
