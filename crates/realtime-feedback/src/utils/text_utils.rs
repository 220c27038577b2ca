//! Source text helpers shared by validation, hashing and the reference providers

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref LINE_COMMENT_REGEX: Regex = Regex::new(r"^\s*(//|\*|/\*)").unwrap();
}

pub struct TextUtils;

impl TextUtils {
    /// Fold `\r\n` and lone `\r` into `\n`, borrowing when nothing changes.
    pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
        if text.contains('\r') {
            Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Number of lines an editor would show; an empty buffer still has one.
    pub fn line_count(text: &str) -> usize {
        text.split('\n').count()
    }

    pub fn line_at(text: &str, line: usize) -> Option<&str> {
        text.split('\n').nth(line).map(|l| l.strip_suffix('\r').unwrap_or(l))
    }

    /// Portion of `line` before char column `column`.
    pub fn prefix_at_column(line: &str, column: usize) -> &str {
        match line.char_indices().nth(column) {
            Some((byte_idx, _)) => &line[..byte_idx],
            None => line,
        }
    }

    pub fn char_len(text: &str) -> usize {
        text.chars().count()
    }

    /// Char column of a byte offset within a line.
    pub fn column_of(line: &str, byte_offset: usize) -> u32 {
        line.get(..byte_offset)
            .map(|prefix| prefix.chars().count() as u32)
            .unwrap_or(0)
    }

    /// Comment-only lines (`//`, `/*`, or ` * ` continuation).
    pub fn is_comment_line(line: &str) -> bool {
        LINE_COMMENT_REGEX.is_match(line)
    }

    /// Drop a trailing `// ...` comment, ignoring `//` inside string literals.
    pub fn strip_line_comment(line: &str) -> &str {
        let mut in_string: Option<char> = None;
        let mut escaped = false;
        let mut previous_slash = false;

        for (idx, ch) in line.char_indices() {
            if let Some(quote) = in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == quote {
                    in_string = None;
                }
                continue;
            }
            match ch {
                '"' | '\'' => {
                    in_string = Some(ch);
                    previous_slash = false;
                }
                '/' if previous_slash => return &line[..idx - 1],
                '/' => previous_slash = true,
                _ => previous_slash = false,
            }
        }
        line
    }

    /// Truncate text to max chars with ellipsis if needed
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            Cow::Borrowed(text)
        } else if max_chars <= 3 {
            Cow::Borrowed("...")
        } else {
            let mut result: String = text.chars().take(max_chars - 3).collect();
            result.push_str("...");
            Cow::Owned(result)
        }
    }

    /// File extension in lowercase, if any.
    pub fn extension(path: &str) -> Option<String> {
        std::path::Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}
