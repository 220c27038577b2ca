//! Gas usage hints

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::error::ProviderError;
use crate::feedback::{Category, Finding, Phase, Severity, Span};
use crate::providers::{FeedbackProvider, ProviderInput, ProviderMetadata};
use crate::utils::TextUtils;

lazy_static! {
    static ref LOOP_REGEX: Regex = Regex::new(r"\b(for|while)\s*\(").unwrap();
    static ref LENGTH_IN_CONDITION_REGEX: Regex =
        Regex::new(r"\bfor\s*\([^;]*;[^;]*\.length\b").unwrap();
    static ref POSTFIX_INCREMENT_REGEX: Regex =
        Regex::new(r"\bfor\s*\([^;]*;[^;]*;\s*([A-Za-z_][A-Za-z0-9_]*)\+\+\s*\)").unwrap();
    static ref PUBLIC_MEMORY_PARAMS_REGEX: Regex =
        Regex::new(r"\bfunction\s+([A-Za-z_][A-Za-z0-9_]*)\s*\([^)]*\bmemory\b[^)]*\)[^{;]*\bpublic\b").unwrap();
    static ref STATE_VARIABLE_REGEX: Regex = Regex::new(
        r"^\s*(?:mapping\s*\(.*\)|[A-Za-z_][A-Za-z0-9_]*(?:\[\d*\])*)\s+((?:(?:public|private|internal|constant|immutable)\s+)*)([A-Za-z_][A-Za-z0-9_]*)\s*(?:=[^>]|;)"
    )
    .unwrap();
    static ref IDENTIFIER_REGEX: Regex = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap();
}

const NON_TYPE_WORDS: &[&str] = &["return", "emit", "delete", "using", "import", "pragma", "event", "error"];

struct LoopScope {
    start_depth: i32,
    opened: bool,
    reported: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct GasProvider;

impl GasProvider {
    pub fn new() -> Self {
        Self
    }

    fn span(line: u32, code: &str, start: usize, end: usize) -> Span {
        Span::line(line, TextUtils::column_of(code, start), TextUtils::column_of(code, end))
    }

    /// Storage variables declared at contract level, excluding constants
    /// and immutables which the compiler inlines.
    fn state_variables(input: &ProviderInput) -> HashSet<String> {
        let mut names = HashSet::new();
        let mut depth: i32 = 0;

        for (_, line) in input.lines() {
            let code = TextUtils::strip_line_comment(line);
            if depth == 1 && !TextUtils::is_comment_line(line) {
                if let Some(caps) = STATE_VARIABLE_REGEX.captures(code) {
                    let first_word = code.split_whitespace().next().unwrap_or_default();
                    let modifiers = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    if !NON_TYPE_WORDS.contains(&first_word)
                        && !modifiers.contains("constant")
                        && !modifiers.contains("immutable")
                    {
                        if let Some(name) = caps.get(2) {
                            names.insert(name.as_str().to_string());
                        }
                    }
                }
            }
            depth += code.matches('{').count() as i32 - code.matches('}').count() as i32;
        }

        names
    }

    fn analyze(input: &ProviderInput) -> Vec<Finding> {
        let state_variables = Self::state_variables(input);
        let mut findings = Vec::new();
        let mut depth: i32 = 0;
        let mut loops: Vec<LoopScope> = Vec::new();

        for (line_no, line) in input.lines() {
            if TextUtils::is_comment_line(line) {
                continue;
            }
            let code = TextUtils::strip_line_comment(line);

            if let Some(m) = LENGTH_IN_CONDITION_REGEX.find(code) {
                findings.push(
                    Finding::new(
                        Category::Gas,
                        Severity::Info,
                        "array length is read on every iteration; cache it in a local variable",
                    )
                    .with_span(Self::span(line_no, code, m.start(), m.end())),
                );
            }

            if let Some(caps) = POSTFIX_INCREMENT_REGEX.captures(code) {
                if let Some(var) = caps.get(1) {
                    findings.push(
                        Finding::new(Category::Gas, Severity::Info, "prefer prefix increment in loops")
                            .with_span(Self::span(line_no, code, var.start(), var.end() + 2))
                            .with_fix(format!("++{}", var.as_str())),
                    );
                }
            }

            if let Some(caps) = PUBLIC_MEMORY_PARAMS_REGEX.captures(code) {
                if let Some(name) = caps.get(1) {
                    findings.push(
                        Finding::new(
                            Category::Gas,
                            Severity::Info,
                            format!(
                                "public function '{}' takes memory parameters; declare it external with calldata",
                                name.as_str()
                            ),
                        )
                        .with_span(Self::span(line_no, code, name.start(), name.end())),
                    );
                }
            }

            if let Some(current) = loops.last_mut() {
                if depth > current.start_depth {
                    for ident in IDENTIFIER_REGEX.find_iter(code) {
                        let name = ident.as_str();
                        if state_variables.contains(name) && current.reported.insert(name.to_string()) {
                            findings.push(
                                Finding::new(
                                    Category::Performance,
                                    Severity::Info,
                                    format!(
                                        "state variable '{}' is accessed inside a loop; cache it in memory",
                                        name
                                    ),
                                )
                                .with_span(Self::span(line_no, code, ident.start(), ident.end())),
                            );
                        }
                    }
                }
            }

            if LOOP_REGEX.is_match(code) {
                loops.push(LoopScope {
                    start_depth: depth,
                    opened: false,
                    reported: HashSet::new(),
                });
            }

            depth += code.matches('{').count() as i32 - code.matches('}').count() as i32;

            while let Some(current) = loops.last_mut() {
                if depth > current.start_depth {
                    current.opened = true;
                    break;
                }
                if current.opened || code.trim_end().ends_with(';') {
                    loops.pop();
                } else {
                    break;
                }
            }
        }

        findings
    }
}

#[async_trait]
impl FeedbackProvider for GasProvider {
    fn id(&self) -> &str {
        "gas"
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
            description: "Loop costs and calldata opportunities".to_string(),
        }
    }
}
