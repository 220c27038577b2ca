//! Per-(session, file) debounce timers
//!
//! Every `schedule` call supersedes the pending timer for its key: the old
//! timer task is aborted and only the newest payload is retained. A timer
//! that has already woken up but lost the race is neutralized by the
//! generation check in `remove_if`, so at most one `Fired` is emitted per
//! quiet period.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::feedback::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub session_id: SessionId,
    pub file_path: String,
}

impl DebounceKey {
    pub fn new(session_id: SessionId, file_path: impl Into<String>) -> Self {
        Self {
            session_id,
            file_path: file_path.into(),
        }
    }
}

/// A settled debounce window.
#[derive(Debug)]
pub struct Fired<T> {
    pub key: DebounceKey,
    /// Strictly increasing across the scheduler; later schedules for the
    /// same key always carry a larger generation.
    pub generation: u64,
    pub payload: T,
}

struct PendingSlot<T> {
    generation: u64,
    payload: T,
    timer: AbortHandle,
}

pub struct DebounceScheduler<T> {
    pending: Arc<DashMap<DebounceKey, PendingSlot<T>>>,
    next_generation: AtomicU64,
    sender: mpsc::UnboundedSender<Fired<T>>,
}

impl<T: Send + Sync + 'static> DebounceScheduler<T> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Fired<T>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            sender,
        };
        (scheduler, receiver)
    }

    fn bump_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Arm (or re-arm) the timer for `key`. Returns the generation assigned
    /// to this payload.
    pub fn schedule(&self, key: DebounceKey, payload: T, delay: Duration) -> u64 {
        let generation = self.bump_generation();

        // holding the entry keeps a zero-delay timer from firing before the
        // slot exists
        let entry = self.pending.entry(key.clone());

        let pending = Arc::clone(&self.pending);
        let sender = self.sender.clone();
        let timer_key = key;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some((key, slot)) = pending.remove_if(&timer_key, |_, slot| slot.generation == generation) {
                debug!(
                    "Debounce window settled for {}:{} (generation {})",
                    key.session_id, key.file_path, generation
                );
                let _ = sender.send(Fired {
                    key,
                    generation,
                    payload: slot.payload,
                });
            }
        })
        .abort_handle();

        let slot = PendingSlot {
            generation,
            payload,
            timer,
        };
        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(slot);
                previous.timer.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
        }

        generation
    }

    /// Skip the remaining quiet period and emit `payload` now, superseding
    /// any pending timer for `key`.
    pub fn fire_now(&self, key: DebounceKey, payload: T) -> u64 {
        if let Some((_, previous)) = self.pending.remove(&key) {
            previous.timer.abort();
        }
        let generation = self.bump_generation();
        if self
            .sender
            .send(Fired {
                key,
                generation,
                payload,
            })
            .is_err()
        {
            debug!("Debounce receiver closed, dropping immediate fire");
        }
        generation
    }

    pub fn cancel(&self, key: &DebounceKey) -> bool {
        match self.pending.remove(key) {
            Some((_, slot)) => {
                slot.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer owned by a session.
    pub fn cancel_session(&self, session_id: &SessionId) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|key, slot| {
            if &key.session_id == session_id {
                slot.timer.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        if cancelled > 0 {
            debug!("Cancelled {} pending timers for session {}", cancelled, session_id);
        }
        cancelled
    }

    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        self.pending.retain(|_, slot| {
            slot.timer.abort();
            cancelled += 1;
            false
        });
        cancelled
    }

    pub fn is_pending(&self, key: &DebounceKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn key(session: &str, file: &str) -> DebounceKey {
        DebounceKey::new(SessionId::from(session), file)
    }

    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Fired<&'static str>>) {
        let next = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(next.is_err(), "unexpected extra fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_last_payload() {
        let (scheduler, mut rx) = DebounceScheduler::new();
        let delay = Duration::from_millis(500);
        let started = Instant::now();

        scheduler.schedule(key("s", "Token.sol"), "v1", delay);
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.schedule(key("s", "Token.sol"), "v2", delay);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let last = scheduler.schedule(key("s", "Token.sol"), "v3", delay);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.payload, "v3");
        assert_eq!(fired.generation, last);
        assert!(started.elapsed() >= Duration::from_millis(540));
        assert_eq!(scheduler.pending_count(), 0);

        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_files_debounce_independently() {
        let (scheduler, mut rx) = DebounceScheduler::new();
        scheduler.schedule(key("s", "A.sol"), "a", Duration::from_millis(100));
        scheduler.schedule(key("s", "B.sol"), "b", Duration::from_millis(300));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.payload, second.payload), ("a", "b"));
        assert!(first.generation < second.generation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_session_is_silent() {
        let (scheduler, mut rx) = DebounceScheduler::new();
        scheduler.schedule(key("s1", "A.sol"), "a", Duration::from_millis(100));
        scheduler.schedule(key("s1", "B.sol"), "b", Duration::from_millis(100));
        scheduler.schedule(key("s2", "A.sol"), "other", Duration::from_millis(100));

        assert_eq!(scheduler.cancel_session(&SessionId::from("s1")), 2);
        assert!(!scheduler.is_pending(&key("s1", "A.sol")));

        assert_eq!(rx.recv().await.unwrap().payload, "other");
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_now_supersedes_pending_timer() {
        let (scheduler, mut rx) = DebounceScheduler::new();
        scheduler.schedule(key("s", "A.sol"), "timer", Duration::from_millis(500));
        let generation = scheduler.fire_now(key("s", "A.sol"), "explicit");

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.payload, "explicit");
        assert_eq!(fired.generation, generation);
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_single_key() {
        let (scheduler, mut rx) = DebounceScheduler::new();
        scheduler.schedule(key("s", "A.sol"), "a", Duration::from_millis(100));
        assert!(scheduler.cancel(&key("s", "A.sol")));
        assert!(!scheduler.cancel(&key("s", "A.sol")));
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_fires() {
        let (scheduler, mut rx) = DebounceScheduler::new();
        scheduler.schedule(key("s", "A.sol"), "now", Duration::ZERO);
        assert_eq!(rx.recv().await.unwrap().payload, "now");
    }
}
