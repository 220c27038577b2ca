//! Cursor-driven member and keyword suggestions

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::error::ProviderError;
use crate::feedback::{Category, Finding, Phase, Severity, Span};
use crate::providers::{FeedbackProvider, ProviderInput, ProviderMetadata};
use crate::utils::TextUtils;

const MIN_KEYWORD_PREFIX: usize = 2;
const MAX_SUGGESTIONS: usize = 20;

lazy_static! {
    static ref MEMBER_ACCESS_REGEX: Regex = Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z0-9_]*)$").unwrap();
    static ref WORD_PREFIX_REGEX: Regex = Regex::new(r"(?:^|[^A-Za-z0-9_.])([A-Za-z_][A-Za-z0-9_]*)$").unwrap();
    static ref MEMBERS: HashMap<&'static str, &'static [&'static str]> = {
        let mut members: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        members.insert("msg", &["data", "sender", "sig", "value"]);
        members.insert("block", &["basefee", "chainid", "coinbase", "gaslimit", "number", "timestamp"]);
        members.insert("tx", &["gasprice", "origin"]);
        members.insert("abi", &["decode", "encode", "encodeCall", "encodePacked", "encodeWithSelector", "encodeWithSignature"]);
        members.insert("this", &["balance", "code", "codehash"]);
        members
    };
}

const KEYWORDS: &[&str] = &[
    "address", "assembly", "bool", "bytes", "bytes32", "calldata", "constant", "constructor",
    "contract", "emit", "enum", "error", "event", "external", "function", "immutable", "import",
    "interface", "internal", "library", "mapping", "memory", "modifier", "override", "payable",
    "pragma", "private", "public", "pure", "require", "return", "returns", "revert", "storage",
    "string", "struct", "uint256", "unchecked", "view", "virtual",
];

#[derive(Debug, Default)]
pub struct CompletionProvider;

impl CompletionProvider {
    pub fn new() -> Self {
        Self
    }

    fn suggestion(label: &str, line: u32, column: u32, typed: usize) -> Finding {
        let start = column.saturating_sub(typed as u32);
        Finding::new(Category::Completion, Severity::Info, label)
            .with_span(Span::line(line, start, column))
            .with_fix(label)
    }

    fn complete(prefix: &str, line: u32, column: u32) -> Vec<Finding> {
        if let Some(caps) = MEMBER_ACCESS_REGEX.captures(prefix) {
            let (Some(object), Some(partial)) = (caps.get(1), caps.get(2)) else {
                return Vec::new();
            };
            let typed = partial.as_str();
            return MEMBERS
                .get(object.as_str())
                .map(|members| {
                    members
                        .iter()
                        .filter(|m| m.starts_with(typed) && **m != typed)
                        .map(|m| Self::suggestion(m, line, column, typed.chars().count()))
                        .collect()
                })
                .unwrap_or_default();
        }

        if let Some(word) = WORD_PREFIX_REGEX.captures(prefix).and_then(|c| c.get(1)) {
            let typed = word.as_str();
            if typed.len() < MIN_KEYWORD_PREFIX {
                return Vec::new();
            }
            return KEYWORDS
                .iter()
                .filter(|k| k.starts_with(typed) && **k != typed)
                .take(MAX_SUGGESTIONS)
                .map(|k| Self::suggestion(k, line, column, typed.chars().count()))
                .collect();
        }

        Vec::new()
    }
}

#[async_trait]
impl FeedbackProvider for CompletionProvider {
    fn id(&self) -> &str {
        "completion"
    }

    fn phase(&self) -> Phase {
        Phase::Instant
    }

    fn cursor_sensitive(&self) -> bool {
        true
    }

    async fn run(&self, input: &ProviderInput) -> Result<Vec<Finding>, ProviderError> {
        let Some(line) = TextUtils::line_at(&input.content, input.cursor.line as usize) else {
            return Ok(Vec::new());
        };
        let prefix = TextUtils::prefix_at_column(line, input.cursor.column as usize);
        Ok(Self::complete(prefix, input.cursor.line, input.cursor.column))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            id: self.id().to_string(),
            phase: self.phase(),
            cursor_sensitive: true,
            path_sensitive: self.path_sensitive(),
            description: "Member and keyword completions at the cursor".to_string(),
        }
    }
}
