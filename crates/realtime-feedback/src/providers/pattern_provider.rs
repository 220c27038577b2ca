//! Line-level vulnerability alerts from a fixed regex rule set

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ProviderError;
use crate::feedback::{Category, Finding, Phase, Severity, Span};
use crate::providers::{FeedbackProvider, ProviderInput, ProviderMetadata};
use crate::utils::TextUtils;

struct PatternRule {
    regex: Regex,
    category: Category,
    severity: Severity,
    message: &'static str,
    fix: Option<&'static str>,
}

impl PatternRule {
    fn new(
        pattern: &str,
        category: Category,
        severity: Severity,
        message: &'static str,
        fix: Option<&'static str>,
    ) -> Self {
        Self {
            regex: Regex::new(pattern).unwrap(),
            category,
            severity,
            message,
            fix,
        }
    }
}

lazy_static! {
    static ref RULES: Vec<PatternRule> = vec![
        PatternRule::new(
            r"\btx\.origin\b",
            Category::Security,
            Severity::Warning,
            "tx.origin is unsafe for authorization; use msg.sender",
            Some("msg.sender"),
        ),
        PatternRule::new(
            r"\b(selfdestruct|suicide)\s*\(",
            Category::Security,
            Severity::Error,
            "selfdestruct can permanently remove the contract and its funds",
            None,
        ),
        PatternRule::new(
            r"\.delegatecall\s*\(",
            Category::Security,
            Severity::Warning,
            "delegatecall executes foreign code against this contract's storage",
            None,
        ),
        PatternRule::new(
            r"\bblock\.timestamp\b",
            Category::Security,
            Severity::Info,
            "block.timestamp can be influenced by validators within a small window",
            None,
        ),
        PatternRule::new(
            r"\bassembly\s*\{",
            Category::Style,
            Severity::Info,
            "inline assembly bypasses compiler safety checks",
            None,
        ),
    ];
}

#[derive(Debug, Default)]
pub struct PatternProvider;

impl PatternProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedbackProvider for PatternProvider {
    fn id(&self) -> &str {
        "patterns"
    }

    fn phase(&self) -> Phase {
        Phase::Instant
    }

    async fn run(&self, input: &ProviderInput) -> Result<Vec<Finding>, ProviderError> {
        let mut findings = Vec::new();

        for (line_no, line) in input.lines() {
            if TextUtils::is_comment_line(line) {
                continue;
            }
            let code = TextUtils::strip_line_comment(line);

            for rule in RULES.iter() {
                for m in rule.regex.find_iter(code) {
                    let span = Span::line(
                        line_no,
                        TextUtils::column_of(code, m.start()),
                        TextUtils::column_of(code, m.end()),
                    );
                    let mut finding =
                        Finding::new(rule.category, rule.severity, rule.message).with_span(span);
                    if let Some(fix) = rule.fix {
                        finding = finding.with_fix(fix);
                    }
                    findings.push(finding);
                }
            }
        }

        Ok(findings)
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: self.id().to_string(),
            phase: self.phase(),
            cursor_sensitive: false,
            path_sensitive: self.path_sensitive(),
            description: "Known-risky constructs (tx.origin, selfdestruct, delegatecall, ...)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{ChangeEvent, ChangeKind, CursorPosition, SessionId};

    async fn scan(content: &str) -> Vec<Finding> {
        let input = ProviderInput::from_event(&ChangeEvent::new(
            SessionId::from("s"),
            "Token.sol",
            content,
            CursorPosition::default(),
            ChangeKind::Edit,
        ));
        PatternProvider::new().run(&input).await.unwrap()
    }

    #[tokio::test]
    async fn test_tx_origin_warning_with_span() {
        let findings = scan("contract A {\n    require(tx.origin == owner);\n}").await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].span, Some(Span::line(1, 12, 21)));
        assert_eq!(findings[0].suggested_fix.as_deref(), Some("msg.sender"));
    }

    #[tokio::test]
    async fn test_rule_severities() {
        let findings = scan(
            "selfdestruct(payable(owner));\nlib.delegatecall(data);\nuint t = block.timestamp;\nassembly { x := 1 }",
        )
        .await;
        let severities: Vec<_> = findings.iter().map(|f| f.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Error, Severity::Warning, Severity::Info, Severity::Info]
        );
    }

    #[tokio::test]
    async fn test_comments_are_ignored() {
        let findings = scan("// tx.origin is bad\n/* selfdestruct( */\nuint a; // tx.origin").await;
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn test_identifiers_containing_keywords_do_not_match() {
        assert!(scan("uint tx_origin_count;\nmytx.originator = 1;").await.is_empty());
    }
}
