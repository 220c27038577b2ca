//! Lexical syntax checks cheap enough for every keystroke

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ProviderError;
use crate::feedback::{Category, Finding, Phase, Severity, Span};
use crate::providers::{FeedbackProvider, ProviderInput, ProviderMetadata};

lazy_static! {
    static ref PRAGMA_REGEX: Regex = Regex::new(r"(?m)^\s*pragma\s+solidity\b").unwrap();
}

const MAX_FINDINGS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    LineComment,
    BlockComment,
    Literal(char),
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn opening_for(close: char) -> char {
    match close {
        ')' => '(',
        ']' => '[',
        _ => '{',
    }
}

fn point(line: u32, column: u32) -> Span {
    Span::line(line, column, column + 1)
}

#[derive(Debug, Default)]
pub struct SyntaxProvider;

impl SyntaxProvider {
    pub fn new() -> Self {
        Self
    }

    fn scan(content: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut stack: Vec<(char, u32, u32)> = Vec::new();
        let mut state = ScanState::Code;
        let mut escaped = false;
        let mut literal_start = (0u32, 0u32);
        let mut comment_start = (0u32, 0u32);
        let (mut line, mut column) = (0u32, 0u32);

        let mut chars = content.chars().peekable();
        while let Some(ch) = chars.next() {
            let (l, c) = (line, column);
            if ch == '\n' {
                line += 1;
                column = 0;
            } else {
                column += 1;
            }

            match state {
                ScanState::Code => match ch {
                    '/' if chars.peek() == Some(&'/') => {
                        chars.next();
                        column += 1;
                        state = ScanState::LineComment;
                    }
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        column += 1;
                        comment_start = (l, c);
                        state = ScanState::BlockComment;
                    }
                    '"' | '\'' => {
                        literal_start = (l, c);
                        escaped = false;
                        state = ScanState::Literal(ch);
                    }
                    '(' | '[' | '{' => stack.push((ch, l, c)),
                    ')' | ']' | '}' => match stack.last().copied() {
                        Some((open, _, _)) if open == opening_for(ch) => {
                            stack.pop();
                        }
                        Some((open, open_line, _)) => {
                            findings.push(
                                Finding::new(
                                    Category::Syntax,
                                    Severity::Error,
                                    format!(
                                        "expected '{}' to close '{}' from line {}, found '{}'",
                                        closing_for(open),
                                        open,
                                        open_line + 1,
                                        ch
                                    ),
                                )
                                .with_span(point(l, c))
                                .with_fix(closing_for(open).to_string()),
                            );
                            stack.pop();
                        }
                        None => {
                            findings.push(
                                Finding::new(
                                    Category::Syntax,
                                    Severity::Error,
                                    format!("unmatched closing '{}'", ch),
                                )
                                .with_span(point(l, c)),
                            );
                        }
                    },
                    _ => {}
                },
                ScanState::LineComment => {
                    if ch == '\n' {
                        state = ScanState::Code;
                    }
                }
                ScanState::BlockComment => {
                    if ch == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        column += 1;
                        state = ScanState::Code;
                    }
                }
                ScanState::Literal(quote) => {
                    if ch == '\n' {
                        findings.push(Self::unterminated_literal(literal_start));
                        state = ScanState::Code;
                    } else if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == quote {
                        state = ScanState::Code;
                    }
                }
            }
        }

        match state {
            ScanState::Literal(_) => findings.push(Self::unterminated_literal(literal_start)),
            ScanState::BlockComment => findings.push(
                Finding::new(Category::Syntax, Severity::Error, "unterminated block comment")
                    .with_span(Span::line(comment_start.0, comment_start.1, comment_start.1 + 2))
                    .with_fix("*/"),
            ),
            _ => {}
        }

        // innermost first
        for (open, l, c) in stack.into_iter().rev() {
            findings.push(
                Finding::new(Category::Syntax, Severity::Error, format!("unclosed '{}'", open))
                    .with_span(point(l, c))
                    .with_fix(closing_for(open).to_string()),
            );
        }

        findings.truncate(MAX_FINDINGS);
        findings
    }

    fn unterminated_literal((line, column): (u32, u32)) -> Finding {
        Finding::new(Category::Syntax, Severity::Error, "unterminated string literal")
            .with_span(point(line, column))
    }

    fn solidity_headers(content: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        if !PRAGMA_REGEX.is_match(content) {
            findings.push(
                Finding::new(
                    Category::Syntax,
                    Severity::Warning,
                    "missing `pragma solidity` version directive",
                )
                .with_fix("pragma solidity ^0.8.0;"),
            );
        }
        if !content.contains("SPDX-License-Identifier") {
            findings.push(
                Finding::new(Category::Hint, Severity::Info, "consider adding an SPDX license header")
                    .with_fix("// SPDX-License-Identifier: MIT"),
            );
        }
        findings
    }
}

#[async_trait]
impl FeedbackProvider for SyntaxProvider {
    fn id(&self) -> &str {
        "syntax"
    }

    fn phase(&self) -> Phase {
        Phase::Instant
    }

    fn path_sensitive(&self) -> bool {
        true
    }

    async fn run(&self, input: &ProviderInput) -> Result<Vec<Finding>, ProviderError> {
        let mut findings = Self::scan(&input.content);
        if input.is_solidity() && !input.content.trim().is_empty() {
            findings.extend(Self::solidity_headers(&input.content));
        }
        Ok(findings)
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: self.id().to_string(),
            phase: self.phase(),
            cursor_sensitive: false,
            path_sensitive: self.path_sensitive(),
            description: "Bracket balance, string literals and source headers".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{ChangeEvent, ChangeKind, CursorPosition, SessionId};

    fn input(path: &str, content: &str) -> ProviderInput {
        ProviderInput::from_event(&ChangeEvent::new(
            SessionId::from("s"),
            path,
            content,
            CursorPosition::default(),
            ChangeKind::Edit,
        ))
    }

    async fn errors(content: &str) -> Vec<Finding> {
        SyntaxProvider::new()
            .run(&input("a.txt", content))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_balanced_source_is_clean() {
        let source = "contract A {\n  function f(uint[] memory xs) public { xs[0] = 1; }\n}\n";
        assert!(errors(source).await.is_empty());
    }

    #[tokio::test]
    async fn test_unclosed_brace_reported_at_opening() {
        let findings = errors("contract A {\n  function f() {\n}").await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message, "unclosed '{'");
        assert_eq!(findings[0].span, Some(Span::line(0, 11, 12)));
        assert_eq!(findings[0].suggested_fix.as_deref(), Some("}"));
    }

    #[tokio::test]
    async fn test_mismatched_and_unmatched_closers() {
        let findings = errors("f(a];\n)").await;
        assert_eq!(findings.len(), 2);
        assert!(findings[0].message.starts_with("expected ')'"));
        assert_eq!(findings[1].message, "unmatched closing ')'");
        assert_eq!(findings[1].span, Some(Span::line(1, 0, 1)));
    }

    #[tokio::test]
    async fn test_brackets_in_comments_and_strings_ignored() {
        let source = "// {\n/* ( [ */\nstring s = \"}\";\nbytes1 c = ')';\n";
        assert!(errors(source).await.is_empty());
    }

    #[tokio::test]
    async fn test_unterminated_literals_and_comments() {
        let findings = errors("string s = \"abc;\nuint x;").await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].message, "unterminated string literal");
        assert_eq!(findings[0].span, Some(Span::line(0, 11, 12)));

        let findings = errors("/* never closed").await;
        assert_eq!(findings[0].message, "unterminated block comment");
    }

    #[tokio::test]
    async fn test_escaped_quote_stays_inside_literal() {
        assert!(errors(r#"string s = "say \"hi\"";"#).await.is_empty());
    }

    #[tokio::test]
    async fn test_solidity_headers() {
        let provider = SyntaxProvider::new();
        let findings = provider
            .run(&input("Token.sol", "contract A {}"))
            .await
            .unwrap();
        assert!(findings
            .iter()
            .any(|f| f.severity == Severity::Warning && f.message.contains("pragma solidity")));
        assert!(findings.iter().any(|f| f.category == Category::Hint));

        let complete = "// SPDX-License-Identifier: MIT\npragma solidity ^0.8.20;\ncontract A {}";
        assert!(provider.run(&input("Token.sol", complete)).await.unwrap().is_empty());

        // non-Solidity files and empty buffers skip header checks
        assert!(provider.run(&input("notes.md", "hello")).await.unwrap().is_empty());
        assert!(provider.run(&input("Token.sol", "  ")).await.unwrap().is_empty());
    }
}
