//! Per-session outbound channel for deferred feedback
//!
//! Each session owns a fixed-capacity queue. Publishing never blocks: on
//! overflow the oldest queued notification is dropped.

use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::feedback::{Feedback, SessionId};

/// Result of a publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    /// Delivered, but the oldest queued notification was dropped to make room
    DroppedOldest,
    /// The session has no open channel
    NoChannel,
}

pub struct FeedbackChannel {
    queue: ArrayQueue<Feedback>,
    notify: Notify,
    closed: AtomicBool,
}

impl FeedbackChannel {
    fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, feedback: Feedback) -> PublishOutcome {
        let outcome = match self.queue.force_push(feedback) {
            Some(_) => PublishOutcome::DroppedOldest,
            None => PublishOutcome::Delivered,
        };
        self.notify.notify_waiters();
        outcome
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Consumer half of a session channel. Several receivers of the same session
/// compete for notifications; each one is delivered once.
#[derive(Clone)]
pub struct FeedbackReceiver {
    channel: Arc<FeedbackChannel>,
}

impl FeedbackReceiver {
    /// Next notification, or `None` once the session has ended and the queue
    /// is drained.
    pub async fn recv(&self) -> Option<Feedback> {
        loop {
            if let Some(feedback) = self.channel.queue.pop() {
                return Some(feedback);
            }
            if self.channel.closed.load(Ordering::Acquire) {
                return self.channel.queue.pop();
            }

            let notified = self.channel.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // re-check after registering so a push between the checks above
            // and enable() is not missed
            if let Some(feedback) = self.channel.queue.pop() {
                return Some(feedback);
            }
            if self.channel.closed.load(Ordering::Acquire) {
                return self.channel.queue.pop();
            }

            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<Feedback> {
        self.channel.queue.pop()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.closed.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.channel.len()
    }
}

pub struct NotificationHub {
    channels: DashMap<SessionId, Arc<FeedbackChannel>>,
    capacity: usize,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn open(&self, session_id: &SessionId) {
        self.channels
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(FeedbackChannel::new(self.capacity)));
    }

    pub fn publish(&self, session_id: &SessionId, feedback: Feedback) -> PublishOutcome {
        let Some(channel) = self.channels.get(session_id).map(|c| Arc::clone(c.value())) else {
            return PublishOutcome::NoChannel;
        };
        let outcome = channel.push(feedback);
        if outcome == PublishOutcome::DroppedOldest {
            debug!("Notification queue full for session {}, dropped oldest", session_id);
        }
        outcome
    }

    pub fn subscribe(&self, session_id: &SessionId) -> Option<FeedbackReceiver> {
        self.channels.get(session_id).map(|channel| FeedbackReceiver {
            channel: Arc::clone(channel.value()),
        })
    }

    /// Remove the channel; existing receivers drain what is queued, then end.
    pub fn close(&self, session_id: &SessionId) {
        if let Some((_, channel)) = self.channels.remove(session_id) {
            channel.close();
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
