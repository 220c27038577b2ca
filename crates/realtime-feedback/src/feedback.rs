//! Core value types flowing through the feedback engine
//!
//! Change events come in from the editor surface, findings come out of the
//! providers, and `Feedback` objects carry both phases back to the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::FeedbackLevel;

/// Opaque session identifier handed out by `start_session`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier shared by the instant response and the deferred notification
/// produced for the same change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(Uuid);

impl FeedbackId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zero-based cursor location; `column` counts chars, not bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
}

impl CursorPosition {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Edit,
    Insert,
    Delete,
}

/// A full snapshot of one file at the moment of a keystroke-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub session_id: SessionId,
    pub file_path: String,
    pub content: String,
    pub cursor: CursorPosition,
    pub kind: ChangeKind,
    #[serde(default)]
    pub trigger_character: Option<char>,
}

impl ChangeEvent {
    pub fn new(
        session_id: SessionId,
        file_path: impl Into<String>,
        content: impl Into<String>,
        cursor: CursorPosition,
        kind: ChangeKind,
    ) -> Self {
        Self {
            session_id,
            file_path: file_path.into(),
            content: content.into(),
            cursor,
            kind,
            trigger_character: None,
        }
    }

    pub fn with_trigger(mut self, trigger: char) -> Self {
        self.trigger_character = Some(trigger);
        self
    }
}

/// Which half of the feedback a provider contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Instant,
    Deferred,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Instant => "instant",
            Phase::Deferred => "deferred",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Syntax,
    Security,
    Style,
    Gas,
    Performance,
    Completion,
    Hint,
    Semantic,
    ProviderUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: CursorPosition,
    pub end: CursorPosition,
}

impl Span {
    pub fn line(line: u32, start_column: u32, end_column: u32) -> Self {
        Self {
            start: CursorPosition::new(line, start_column),
            end: CursorPosition::new(line, end_column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl Finding {
    pub fn new(category: Category, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            span: None,
            suggested_fix: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Failure,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one provider for one phase execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    pub provider_id: String,
    pub success: bool,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderFailure>,
}

impl ProviderResult {
    pub fn succeeded(provider_id: impl Into<String>, findings: Vec<Finding>) -> Self {
        Self {
            provider_id: provider_id.into(),
            success: true,
            findings,
            error: None,
        }
    }

    /// Failure entry carrying a `provider_unavailable` marker so editors can
    /// render the gap instead of silently showing nothing.
    pub fn failed(provider_id: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        let provider_id = provider_id.into();
        let message = message.into();
        let marker = Finding::new(
            Category::ProviderUnavailable,
            Severity::Warning,
            format!("provider '{}' unavailable: {}", provider_id, message),
        );
        Self {
            provider_id,
            success: false,
            findings: vec![marker],
            error: Some(ProviderFailure { kind, message }),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(&self.error, Some(ProviderFailure { kind: FailureKind::Timeout, .. }))
    }
}

/// All provider results of one phase, in registry order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPartition {
    pub phase: Phase,
    pub results: Vec<ProviderResult>,
}

impl FeedbackPartition {
    pub fn empty(phase: Phase) -> Self {
        Self { phase, results: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.results.iter().flat_map(|r| r.findings.iter())
    }

    pub fn findings_in(&self, category: Category) -> impl Iterator<Item = &Finding> {
        self.findings().filter(move |f| f.category == category)
    }

    pub fn result_for(&self, provider_id: &str) -> Option<&ProviderResult> {
        self.results.iter().find(|r| r.provider_id == provider_id)
    }

    pub fn failed_providers(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.provider_id.as_str())
            .collect()
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings().map(|f| f.severity).max()
    }

    /// Apply the session's verbosity. `Minimal` drops informational findings
    /// (completions excepted) and suggested fixes.
    pub fn filtered(mut self, level: FeedbackLevel) -> Self {
        if level == FeedbackLevel::Minimal {
            for result in &mut self.results {
                result.findings.retain(|f| {
                    f.category == Category::Completion || f.severity >= Severity::Warning
                });
                for finding in &mut result.findings {
                    if finding.category != Category::Completion {
                        finding.suggested_fix = None;
                    }
                }
            }
        }
        self
    }
}

/// Per-provider timing, recorded only for verbose sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTiming {
    pub provider_id: String,
    pub duration_ms: u64,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackMetadata {
    pub change_kind: ChangeKind,
    pub processing_ms: u64,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_timings: Vec<ProviderTiming>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: FeedbackId,
    pub session_id: SessionId,
    pub file_path: String,
    pub timestamp: DateTime<Utc>,
    pub instant: FeedbackPartition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred: Option<FeedbackPartition>,
    pub metadata: FeedbackMetadata,
}

impl Feedback {
    /// True for notifications carrying the debounced phase.
    pub fn is_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    pub fn all_findings(&self) -> impl Iterator<Item = &Finding> {
        self.instant
            .findings()
            .chain(self.deferred.iter().flat_map(|d| d.findings()))
    }
}
