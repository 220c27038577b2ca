//! Deferred review by an OpenAI-compatible chat completions backend
//!
//! The model is asked for a bare JSON array of findings. Anything that
//! cannot be parsed into findings is reported as an invalid response, which
//! the aggregator turns into a failure entry like any other provider error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::ProviderError;
use crate::feedback::{Category, Finding, Phase, Severity, Span};
use crate::providers::{FeedbackProvider, ProviderInput, ProviderMetadata};
use crate::utils::TextUtils;

const MAX_PROMPT_CHARS: usize = 24_000;
const MAX_ERROR_BODY_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You review smart contract source code. Reply with a JSON array only. \
Each element is an object with the keys \"severity\" (info, warning, error or critical), \
\"category\" (security, gas, style or semantic), \"message\", \"line\" (1-based, optional) \
and \"suggestion\" (optional). Reply with [] when there is nothing to report.";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct LlmFinding {
    severity: String,
    #[serde(default)]
    category: Option<String>,
    message: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    suggestion: Option<String>,
}

pub struct LlmProvider {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl LlmProvider {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build LLM HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: "local-llm".to_string(),
            timeout,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_messages(input: &ProviderInput) -> Vec<ChatMessage> {
        let source = TextUtils::truncate_with_ellipsis(&input.content, MAX_PROMPT_CHARS);
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: format!("File: {}\n\n{}", input.file_path, source),
            },
        ]
    }

    fn parse_severity(raw: &str) -> Severity {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "error" | "high" => Severity::Error,
            "warning" | "medium" => Severity::Warning,
            _ => Severity::Info,
        }
    }

    fn parse_category(raw: Option<&str>) -> Category {
        match raw.map(|c| c.trim().to_ascii_lowercase()).as_deref() {
            Some("security") => Category::Security,
            Some("gas") => Category::Gas,
            Some("performance") => Category::Performance,
            Some("style") => Category::Style,
            Some("syntax") => Category::Syntax,
            _ => Category::Semantic,
        }
    }

    /// Pull the outermost JSON array out of a chat reply, tolerating prose or
    /// code fences around it.
    fn parse_findings(reply: &str, input: &ProviderInput) -> Result<Vec<Finding>, ProviderError> {
        let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) else {
            return Err(ProviderError::InvalidResponse("reply contains no JSON array".to_string()));
        };
        if end < start {
            return Err(ProviderError::InvalidResponse("reply contains no JSON array".to_string()));
        }

        let raw: Vec<LlmFinding> = serde_json::from_str(&reply[start..=end])
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(raw
            .into_iter()
            .map(|item| {
                let mut finding = Finding::new(
                    Self::parse_category(item.category.as_deref()),
                    Self::parse_severity(&item.severity),
                    item.message,
                );
                let line = item
                    .line
                    .and_then(|l| l.checked_sub(1))
                    .and_then(|l| TextUtils::line_at(&input.content, l as usize).map(|text| (l, text)));
                if let Some((line_no, text)) = line {
                    finding = finding.with_span(Span::line(line_no, 0, TextUtils::char_len(text) as u32));
                }
                if let Some(fix) = item.suggestion.filter(|s| !s.trim().is_empty()) {
                    finding = finding.with_fix(fix);
                }
                finding
            })
            .collect())
    }
}

#[async_trait]
impl FeedbackProvider for LlmProvider {
    fn id(&self) -> &str {
        "llm"
    }

    fn phase(&self) -> Phase {
        Phase::Deferred
    }

    fn path_sensitive(&self) -> bool {
        true
    }

    async fn run(&self, input: &ProviderInput) -> Result<Vec<Finding>, ProviderError> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": Self::build_messages(input),
            "temperature": 0.0,
            "stream": false,
        });

        let resp = self
            .http_client
            .post(self.completions_url())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        deadline_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    ProviderError::Unavailable(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::failed(format!(
                "backend returned {}: {}",
                status,
                TextUtils::truncate_with_ellipsis(&body, MAX_ERROR_BODY_CHARS)
            )));
        }

        let response: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".to_string()))?;

        let findings = Self::parse_findings(content, input)?;
        debug!("LLM backend returned {} findings for {}", findings.len(), input.file_path);
        Ok(findings)
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: self.id().to_string(),
            phase: self.phase(),
            cursor_sensitive: false,
            path_sensitive: self.path_sensitive(),
            description: format!("LLM review via {}", self.base_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{ChangeEvent, ChangeKind, CursorPosition, SessionId};

    fn input() -> ProviderInput {
        ProviderInput::from_event(&ChangeEvent::new(
            SessionId::from("s"),
            "Token.sol",
            "contract Token {\n    function kill() public { selfdestruct(payable(msg.sender)); }\n}",
            CursorPosition::default(),
            ChangeKind::Edit,
        ))
    }

    fn completion_body(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_findings_parsed_from_reply() {
        let mut server = mockito::Server::new_async().await;
        let reply = "Here you go:\n```json\n[{\"severity\": \"critical\", \"category\": \"security\", \
                     \"message\": \"anyone can destroy the contract\", \"line\": 2, \
                     \"suggestion\": \"add onlyOwner\"}]\n```";
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(reply))
            .create_async()
            .await;

        let provider = LlmProvider::new(&server.url(), Duration::from_secs(5)).unwrap();
        let findings = provider.run(&input()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].category, Category::Security);
        assert_eq!(findings[0].span.map(|s| s.start.line), Some(1));
        assert_eq!(findings[0].suggested_fix.as_deref(), Some("add onlyOwner"));
    }

    #[tokio::test]
    async fn test_empty_array_means_no_findings() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("[]"))
            .create_async()
            .await;

        let provider = LlmProvider::new(&server.url(), Duration::from_secs(5)).unwrap();
        assert!(provider.run(&input()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("model loading")
            .create_async()
            .await;

        let provider = LlmProvider::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = provider.run(&input()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Failed(ref msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_unparseable_reply() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("I could not review this file."))
            .create_async()
            .await;

        let provider = LlmProvider::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = provider.run(&input()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let provider = LlmProvider::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = provider.run(&input()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_) | ProviderError::Timeout { .. }));
    }

    #[test]
    fn test_out_of_range_line_has_no_span() {
        let findings = LlmProvider::parse_findings(
            r#"[{"severity": "warning", "message": "m", "line": 99}, {"severity": "weird", "message": "n", "line": 0}]"#,
            &input(),
        )
        .unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.span.is_none()));
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[1].severity, Severity::Info);
        assert_eq!(findings[1].category, Category::Semantic);
    }
}
