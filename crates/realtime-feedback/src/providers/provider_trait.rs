use async_trait::async_trait;
use serde::Serialize;

use crate::cache_management::{ContentHash, HashScope};
use crate::error::ProviderError;
use crate::feedback::{ChangeEvent, CursorPosition, Finding, Phase, SessionId};
use crate::utils::TextUtils;

/// Snapshot handed to every provider of a phase execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInput {
    pub session_id: SessionId,
    pub file_path: String,
    /// Content with line endings normalized to `\n`
    pub content: String,
    pub cursor: CursorPosition,
    pub trigger_character: Option<char>,
}

impl ProviderInput {
    pub fn from_event(event: &ChangeEvent) -> Self {
        Self {
            session_id: event.session_id.clone(),
            file_path: event.file_path.clone(),
            content: TextUtils::normalize_line_endings(&event.content).into_owned(),
            cursor: event.cursor,
            trigger_character: event.trigger_character,
        }
    }

    /// Hash of the content alone.
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::compute(&self.content, HashScope::default())
    }

    /// Cache key for `provider`: the content plus the cursor and the file
    /// path when the provider declares it reads them.
    pub fn cache_key(&self, provider: &dyn FeedbackProvider) -> ContentHash {
        let scope = HashScope {
            cursor: provider
                .cursor_sensitive()
                .then_some((self.cursor, self.trigger_character)),
            file_path: provider.path_sensitive().then_some(self.file_path.as_str()),
        };
        ContentHash::compute(&self.content, scope)
    }

    pub fn lines(&self) -> impl Iterator<Item = (u32, &str)> {
        self.content
            .split('\n')
            .enumerate()
            .map(|(idx, line)| (idx as u32, line))
    }

    pub fn is_solidity(&self) -> bool {
        TextUtils::extension(&self.file_path).as_deref() == Some("sol")
    }
}

/// Analyzer plugged into the engine.
///
/// Providers are stateless with respect to sessions: the same input must
/// produce the same findings, which is what makes their results cacheable
/// across sessions.
#[async_trait]
pub trait FeedbackProvider: Send + Sync {
    /// Stable identifier, unique within a registry
    fn id(&self) -> &str;

    /// Phase this provider runs in
    fn phase(&self) -> Phase;

    /// Whether results depend on the cursor and trigger character
    fn cursor_sensitive(&self) -> bool {
        false
    }

    /// Whether results depend on the file path (extension checks, prompts)
    fn path_sensitive(&self) -> bool {
        false
    }

    async fn run(&self, input: &ProviderInput) -> Result<Vec<Finding>, ProviderError>;

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: self.id().to_string(),
            phase: self.phase(),
            cursor_sensitive: self.cursor_sensitive(),
            path_sensitive: self.path_sensitive(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    pub id: String,
    pub phase: Phase,
    pub cursor_sensitive: bool,
    pub path_sensitive: bool,
    pub description: String,
}
