//! Error taxonomy for the feedback engine
//!
//! Only `FeedbackError` ever reaches a caller. Provider and cache errors are
//! absorbed by the aggregator and turned into failure entries or cache misses.

use thiserror::Error;

use crate::feedback::SessionId;

/// Request-level errors returned by the engine's public operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackError {
    /// The session was never started, has ended, or was reclaimed as idle.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The change event is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl FeedbackError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Callers may recover by starting a new session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}

/// Errors a provider reports for a single run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider failed: {0}")]
    Failed(String),

    #[error("deadline of {deadline_ms}ms exceeded")]
    Timeout { deadline_ms: u64 },

    #[error("provider panicked: {0}")]
    Panicked(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider backend unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// The shared cache could not be reached; lookups degrade to misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("content cache unavailable")]
pub struct CacheUnavailable;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = FeedbackError::SessionNotFound(SessionId::from("abc"));
        assert_eq!(err.to_string(), "session not found: abc");
        assert!(err.is_recoverable());

        let err = FeedbackError::invalid("file path is required");
        assert_eq!(err.to_string(), "invalid input: file path is required");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_provider_timeout_is_distinct() {
        assert!(ProviderError::Timeout { deadline_ms: 50 }.is_timeout());
        assert!(!ProviderError::failed("boom").is_timeout());
        assert_eq!(
            ProviderError::Timeout { deadline_ms: 50 }.to_string(),
            "deadline of 50ms exceeded"
        );
    }
}
