//! Function-scoped security heuristics, run after typing pauses

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ProviderError;
use crate::feedback::{Category, Finding, Phase, Severity, Span};
use crate::providers::{FeedbackProvider, ProviderInput, ProviderMetadata};
use crate::utils::TextUtils;

lazy_static! {
    static ref FUNCTION_REGEX: Regex = Regex::new(r"\b(function|constructor|receive|fallback)\b").unwrap();
    static ref EXTERNAL_CALL_REGEX: Regex =
        Regex::new(r"\.(call|send|transfer)\s*(\{[^}]*\})?\s*\(").unwrap();
    static ref LOW_LEVEL_CALL_REGEX: Regex =
        Regex::new(r"\.(call|send|delegatecall)\s*(\{[^}]*\})?\s*\(").unwrap();
    static ref STATE_WRITE_REGEX: Regex = Regex::new(
        r"^\s*[A-Za-z_][A-Za-z0-9_]*(\[[^\]]*\])*(\.[A-Za-z_][A-Za-z0-9_]*)*\s*(=|\+=|-=|\*=|/=)[^=]"
    )
    .unwrap();
    static ref TX_ORIGIN_AUTH_REGEX: Regex = Regex::new(
        r"\b(require|if)\s*\(\s*(tx\.origin\s*==|[A-Za-z_][A-Za-z0-9_.\[\]]*\s*==\s*tx\.origin\b)"
    )
    .unwrap();
}

struct FunctionScope {
    start_depth: i32,
    opened: bool,
    external_call: Option<(u32, u32, u32)>,
    reported: bool,
}

#[derive(Debug, Default)]
pub struct SecurityProvider;

impl SecurityProvider {
    pub fn new() -> Self {
        Self
    }

    fn is_checked(code: &str, call_start: usize) -> bool {
        let before = &code[..call_start];
        before.contains('=') || before.contains("require") || before.contains("if") || before.contains("return")
    }

    fn analyze(input: &ProviderInput) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut depth: i32 = 0;
        let mut scope: Option<FunctionScope> = None;

        for (line_no, line) in input.lines() {
            if TextUtils::is_comment_line(line) {
                continue;
            }
            let code = TextUtils::strip_line_comment(line);

            if scope.is_none() && FUNCTION_REGEX.is_match(code) {
                scope = Some(FunctionScope {
                    start_depth: depth,
                    opened: false,
                    external_call: None,
                    reported: false,
                });
            }

            if let Some(m) = TX_ORIGIN_AUTH_REGEX.find(code) {
                findings.push(
                    Finding::new(
                        Category::Security,
                        Severity::Critical,
                        "tx.origin used for authorization enables phishing through intermediate contracts",
                    )
                    .with_span(Span::line(
                        line_no,
                        TextUtils::column_of(code, m.start()),
                        TextUtils::column_of(code, m.end()),
                    ))
                    .with_fix("compare msg.sender instead of tx.origin"),
                );
            }

            if let Some(m) = LOW_LEVEL_CALL_REGEX.find(code) {
                if !Self::is_checked(code, m.start()) {
                    findings.push(
                        Finding::new(
                            Category::Security,
                            Severity::Warning,
                            "return value of low-level call is not checked",
                        )
                        .with_span(Span::line(
                            line_no,
                            TextUtils::column_of(code, m.start()),
                            TextUtils::column_of(code, m.end()),
                        ))
                        .with_fix("(bool ok, ) = ...; require(ok);"),
                    );
                }
            }

            if let Some(current) = scope.as_mut() {
                if let Some(m) = EXTERNAL_CALL_REGEX.find(code) {
                    if current.external_call.is_none() {
                        current.external_call = Some((
                            line_no,
                            TextUtils::column_of(code, m.start()),
                            TextUtils::column_of(code, m.end()),
                        ));
                    }
                } else if let Some((call_line, start, end)) = current.external_call {
                    if !current.reported && STATE_WRITE_REGEX.is_match(code) {
                        current.reported = true;
                        findings.push(
                            Finding::new(
                                Category::Security,
                                Severity::Error,
                                format!(
                                    "state is written on line {} after an external call (possible reentrancy)",
                                    line_no + 1
                                ),
                            )
                            .with_span(Span::line(call_line, start, end))
                            .with_fix("update state before making the external call"),
                        );
                    }
                }
            }

            depth += code.matches('{').count() as i32 - code.matches('}').count() as i32;

            if let Some(current) = scope.as_mut() {
                if depth > current.start_depth {
                    current.opened = true;
                } else if current.opened || code.trim_end().ends_with(';') {
                    // body closed, or a bodyless declaration
                    scope = None;
                }
            }
        }

        findings
    }
}

#[async_trait]
impl FeedbackProvider for SecurityProvider {
    fn id(&self) -> &str {
        "security"
    }

    fn phase(&self) -> Phase {
        Phase::Deferred
    }

    async fn run(&self, input: &ProviderInput) -> Result<Vec<Finding>, ProviderError> {
        Ok(Self::analyze(input))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: self.id().to_string(),
            phase: self.phase(),
            cursor_sensitive: false,
            path_sensitive: self.path_sensitive(),
            description: "Reentrancy, unchecked calls and tx.origin authorization".to_string(),
        }
    }
}
