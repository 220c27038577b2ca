// realtime-feedback/src/lib.rs

pub mod cache_management;
pub mod config;
pub mod error;
pub mod feedback;
pub mod feedback_engine;
pub mod history;
pub mod metrics;
pub mod notifications;
pub mod providers;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use config::{EngineConfig, FeedbackLevel, SessionConfig};
pub use error::{CacheUnavailable, FeedbackError, ProviderError};
pub use feedback::{
    Category, ChangeEvent, ChangeKind, CursorPosition, Feedback, FeedbackId, FeedbackPartition,
    Finding, Phase, ProviderResult, SessionId, Severity, Span,
};
pub use feedback_engine::{FeedbackEngine, SessionMetrics, SessionStatus, SessionView};
pub use history::{HistoryStore, InMemoryHistoryStore};
pub use metrics::MetricsView;
pub use notifications::FeedbackReceiver;
pub use providers::{FeedbackProvider, ProviderInput, ProviderRegistry};
