//! Feedback engine module - Session lifecycle, phase fan-out and debounced deferred analysis

pub mod aggregator;
pub mod debounce;
pub mod deferred_worker;
pub mod engine;
pub mod session_manager;
pub mod validation;

pub use aggregator::{FanOutAggregator, PhaseOutcome};
pub use debounce::{DebounceKey, DebounceScheduler, Fired};
pub use deferred_worker::DeferredJob;
pub use engine::FeedbackEngine;
pub use session_manager::{SessionMetrics, SessionStatus, SessionView};
pub use validation::{validate_change, MAX_FILE_PATH_BYTES};
